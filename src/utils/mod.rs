pub mod html;
pub mod json_extract;
pub mod parse_outcome;
pub mod retry;
pub mod yaml_file;

pub mod ai_service;
pub mod embed_service;
pub mod glossary_service;
pub mod index_service;
pub mod pdf_service;
pub mod quiz_service;
pub mod report_service;
pub mod retrieval_service;
pub mod scrape_service;
pub mod verification_service;

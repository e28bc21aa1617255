pub mod document;
pub mod glossary;
pub mod question;
pub mod session;

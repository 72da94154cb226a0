pub mod contacts;
pub mod extract;
pub mod identify;
pub mod info;

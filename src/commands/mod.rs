pub mod help;
pub mod image;
pub mod run;
pub mod versions;

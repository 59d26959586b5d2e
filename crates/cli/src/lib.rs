pub mod logging;
pub mod managers;
pub mod manifest;
pub mod output;

pub mod analyze;
pub mod init;
pub mod providers;

pub mod download;
pub mod exec;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{Downloader, HttpDownloader};
pub use exec::{CommandExecutor, LocalExecutor, PackageManager};

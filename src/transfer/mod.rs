pub mod archive;
pub mod batch;
pub mod download;
pub mod extract;
pub mod upload;

pub use archive::{build_archive, TempArchive};
pub use batch::{check_unique_paths, split_fixed, split_n_way, TransferBatch};
pub use download::{ByteProgressFn, DownloadOptions, Downloader};
pub use extract::{extract_archive, extract_session_archives};
pub use upload::{BatchProgressFn, UploadDestination, Uploader};

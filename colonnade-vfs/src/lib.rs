pub mod backend;
pub mod codec;
pub mod download_cache;
pub mod stream;
pub mod url;

pub use backend::Vfs;
pub use download_cache::DownloadCache;
pub use stream::{InputStream, OutputStream};
pub use url::Scheme;

pub mod backend;
pub mod local;
pub mod remote;
pub mod s3;
pub mod types;
pub mod webdav;

pub use backend::{Provider, RemoteTransport, S3Provider};
pub use local::LocalFs;
pub use remote::OperatorTransport;
pub use types::*;

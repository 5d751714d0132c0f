// 媒体域模块：领域类型、GMID、内容存储与缩略图

pub mod content_store;
pub mod gmid;
pub mod thumbnail;
pub mod types;

pub use content_store::{ContentStore, StoredFile};
pub use gmid::derive_gmid;
pub use types::{IndexState, MediaRecord, MediaType};

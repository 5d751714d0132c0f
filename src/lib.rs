/*!
 * Famory 核心库
 *
 * 自托管家庭相册的媒体入库与多模态检索引擎。
 * 各子系统按职责划分：内容存储、元数据注册表、embedding客户端、
 * 向量索引、入库流水线、搜索引擎和HTTP接口层。
 */

pub mod api;
pub mod config;
pub mod embedding;
pub mod media;
pub mod pipeline;
pub mod registry;
pub mod search;
pub mod utils;
pub mod vector_index;

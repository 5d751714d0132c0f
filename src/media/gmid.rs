/*!
 * 全局媒体ID（GMID）
 *
 * 32位十六进制字符串，由文件字节内容的SHA-256哈希截断得到。
 * 同一份字节内容无论上传多少次都得到同一个GMID，文件系统、
 * 注册表与向量点共用这一个标识。
 */

use sha2::{Digest, Sha256};

/// 由文件内容派生GMID
pub fn derive_gmid(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    // SHA-256共64个十六进制字符，取前32位已足够避免实际冲突
    let hex = format!("{:x}", digest);
    hex[..32].to_string()
}

//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 生成唯一的检查号（Accession Number）
pub fn generate_accession_number() -> String {
    format!(
        "ACC{}{}",
        Utc::now().format("%Y%m%d"),
        Uuid::new_v4().simple().to_string()[..8].to_uppercase()
    )
}

/// 验证检查号格式
pub fn is_valid_accession_number(accession: &str) -> bool {
    // 检查号为非空、不超过24位的大写字母数字串
    !accession.is_empty()
        && accession.len() <= 24
        && accession
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

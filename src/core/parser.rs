//! 传输记录解析
//!
//! 外部工具每处理一个文件输出一行：`<动作>: <源> to <目标>`，
//! 演练模式下行首带有 `(dryrun) ` 标记。

use crate::error::ParseError;

/// 演练模式前缀
pub const DRY_RUN_PREFIX: &str = "(dryrun) ";
/// 动作分隔符
pub const ACTION_DELIMITER: &str = ": ";
/// 源与目标之间的分隔符
pub const PATH_SEPARATOR: &str = " to ";

/// 单个文件的传输记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub action: String,
    pub source_path: String,
    pub target_path: String,
}

/// 传输记录解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferRecordParser;

impl TransferRecordParser {
    pub fn new() -> Self {
        Self
    }

    /// 解析一行输出
    ///
    /// 空行返回 `Ok(None)`；无法拆分的行返回 `ParseError`，由调用方记录后丢弃。
    pub fn parse_line(&self, line: &str) -> Result<Option<TransferRecord>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let line = line.strip_prefix(DRY_RUN_PREFIX).unwrap_or(line);

        let (action, rest) = line
            .split_once(ACTION_DELIMITER)
            .ok_or_else(|| ParseError::MissingActionDelimiter(line.to_string()))?;

        let (source_path, target_path) = split_paths(rest)
            .ok_or_else(|| ParseError::MissingPathSeparator(line.to_string()))?;

        Ok(Some(TransferRecord {
            action: action.to_string(),
            source_path,
            target_path,
        }))
    }
}

/// 拆分源与目标路径
///
/// 分隔符也可能出现在文件名中。分段数 K 大于 2 时，前 K/2 段拼回源路径，
/// 其余拼回目标路径。这是启发式规则，源路径本身含分隔符次数多于目标时会拆错。
fn split_paths(rest: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
    if segments.len() < 2 {
        return None;
    }

    let mid = segments.len() / 2;
    Some((
        segments[..mid].join(PATH_SEPARATOR),
        segments[mid..].join(PATH_SEPARATOR),
    ))
}

//! 映射文件生成
//!
//! 从任务 ID 列表（CSV 第一列）和条目模板生成 mapping.json。

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// 模板中的任务 ID 占位符
pub const JOB_ID_PLACEHOLDER: &str = "{{job_id}}";

/// 默认条目模板
pub const DEFAULT_TEMPLATE: &str = r#"
{
    "id": "{{job_id}}",
    "source": "/{{job_id}}/uploads/images",
    "include": [],
    "exclude": [
        "*folder1/*",
        "*folder3/*"
    ],
    "target": "s3://my_bucket/{{job_id}}/images"
}
"#;

/// 读取 CSV 每行的第一列作为任务 ID，忽略空行
pub fn parse_job_ids(csv: &str) -> Vec<String> {
    csv.lines()
        .filter_map(|line| {
            let first = line.split(',').next()?.trim().trim_matches('"').trim();
            (!first.is_empty()).then(|| first.to_string())
        })
        .collect()
}

/// 用任务 ID 渲染一个映射条目
pub fn render_entry(template: &str, job_id: &str) -> Result<Value> {
    let rendered = template.replace(JOB_ID_PLACEHOLDER, job_id);
    serde_json::from_str(&rendered)
        .with_context(|| format!("任务 {} 的模板渲染结果不是有效的 JSON", job_id))
}

/// 生成完整的映射文档，默认开启演练模式
pub fn build_mapping(template: &str, job_ids: &[String]) -> Result<Value> {
    let mut entries = Vec::with_capacity(job_ids.len());
    for job_id in job_ids {
        let entry = render_entry(template, job_id)?;
        debug!("{}", entry);
        entries.push(entry);
    }

    Ok(json!({
        "test": true,
        "mapping": entries,
    }))
}

/// 读取 ID 列表，生成并写出映射文件
pub fn generate_mapping_file(ids_csv: &Path, template: Option<&Path>, output: &Path) -> Result<usize> {
    let csv = fs::read_to_string(ids_csv)
        .with_context(|| format!("读取任务 ID 列表 {} 失败", ids_csv.display()))?;

    let template = match template {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("读取模板 {} 失败", path.display()))?,
        None => DEFAULT_TEMPLATE.to_string(),
    };

    let job_ids = parse_job_ids(&csv);
    let document = build_mapping(&template, &job_ids)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("创建目录 {} 失败", parent.display()))?;
    }
    fs::write(output, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("写入 {} 失败", output.display()))?;

    info!("File {} created with success", output.display());
    Ok(job_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;

    #[test]
    fn test_parse_job_ids() {
        let ids = parse_job_ids("1001\n\n\"1002\",extra\n  1003 \n");
        assert_eq!(ids, vec!["1001", "1002", "1003"]);
    }

    #[test]
    fn test_default_template_renders_every_placeholder() {
        let entry = render_entry(DEFAULT_TEMPLATE, "42").unwrap();
        assert_eq!(entry["id"], "42");
        assert_eq!(entry["source"], "/42/uploads/images");
        assert_eq!(entry["target"], "s3://my_bucket/42/images");
        assert_eq!(entry["exclude"][1], "*folder3/*");
    }

    #[test]
    fn test_generated_mapping_passes_validation() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let doc = build_mapping(DEFAULT_TEMPLATE, &ids).unwrap();

        let config = MappingConfig::from_value(&doc).unwrap();
        assert!(config.test_mode);
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.entries[1].source, "/b/uploads/images");
    }

    #[test]
    fn test_invalid_template_is_an_error() {
        let err = render_entry("{\"id\": {{job_id}}", "x").unwrap_err();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn test_generate_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let ids = dir.path().join("job_ids.csv");
        let output = dir.path().join("out").join("mapping.json");
        fs::write(&ids, "7\n8\n").unwrap();

        let count = generate_mapping_file(&ids, None, &output).unwrap();
        assert_eq!(count, 2);

        let config = MappingConfig::load(&output).unwrap();
        assert_eq!(config.entries[0].id, "7");
    }

    #[test]
    fn test_missing_ids_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = generate_mapping_file(
            &dir.path().join("missing.csv"),
            None,
            &dir.path().join("mapping.json"),
        );
        assert!(result.is_err());
    }
}

//! 模型输出解析：严格优先，失败后有界兜底
//!
//! 依次尝试：严格 JSON 解码 → 剥离代码围栏 → 修复（去尾逗号、补齐未闭合的
//! 引号与括号）→ 调用方的正则字段提取。每步返回带标签的结果，首个成功者
//! 短路；解析失败从不作为异常向上抛。

use serde::de::DeserializeOwned;
use serde_json::Value;

/// 解析成功时命中的策略（用于日志与测试断言）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Strict,
    Fenced,
    Repaired,
}

/// 解析结果：值 + 命中策略
#[derive(Debug)]
pub struct Parsed<T> {
    pub value: T,
    pub strategy: ParseStrategy,
}

/// 宽松解析：严格 → 去围栏 → 修复，全部失败返回 Err
pub fn parse_relaxed<T: DeserializeOwned>(raw: &str) -> Result<Parsed<T>, String> {
    if let Ok(value) = serde_json::from_str::<T>(raw) {
        return Ok(Parsed {
            value,
            strategy: ParseStrategy::Strict,
        });
    }

    let stripped = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str::<T>(&stripped) {
        return Ok(Parsed {
            value,
            strategy: ParseStrategy::Fenced,
        });
    }

    let repaired = repair_json(&stripped);
    match serde_json::from_str::<T>(&repaired) {
        Ok(value) => Ok(Parsed {
            value,
            strategy: ParseStrategy::Repaired,
        }),
        Err(e) => Err(format!("all parse strategies failed: {}", e)),
    }
}

/// 剥离 Markdown 代码围栏（```json ... ``` 或 ``` ... ```）
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        let body = rest.strip_suffix("```").unwrap_or(rest);
        return body.trim().to_string();
    }
    // 正文夹杂围栏块时取首个围栏内容
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// 有界修复：去掉尾随逗号，补齐流中断导致的未闭合引号与括号
pub fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut in_string = false;
    let mut escaped = false;
    let mut stack: Vec<char> = Vec::new();

    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
        out.push(c);
    }

    // 字符串在流中断处未闭合
    if in_string {
        out.push('"');
    }

    // 去掉补括号前的尾随逗号
    while out.trim_end().ends_with(',') {
        let end = out.trim_end().len() - 1;
        out.truncate(end);
    }

    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

/// 字面转义序列还原（\\n、\\"、\\t）：流式片段中常见的双重转义
pub fn unescape_literals(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\t", "\t")
}

/// 正则兜底：从畸形输出中提取单个字符串字段的值
pub fn extract_string_field(raw: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(field));
    let re = regex::Regex::new(&pattern).ok()?;
    re.captures(raw)
        .map(|caps| unescape_literals(&caps[1]))
}

/// 正则兜底：提取布尔字段
pub fn extract_bool_field(raw: &str, field: &str) -> Option<bool> {
    let pattern = format!(r#""{}"\s*:\s*(true|false)"#, regex::escape(field));
    let re = regex::Regex::new(&pattern).ok()?;
    re.captures(raw).map(|caps| &caps[1] == "true")
}

/// 从任意文本中定位首个 JSON 对象（协调者偶尔在 JSON 外包裹解说文字）
pub fn first_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let candidate = &raw[start..];
    serde_json::from_str(candidate)
        .or_else(|_| serde_json::from_str(&repair_json(candidate)))
        .ok()
}

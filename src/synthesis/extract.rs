//! 渐进式句子提取
//!
//! 从逐片到达的流式载荷中增量定位朗读字段（载荷最终是含该字段的
//! JSON 对象），对字段值做转义感知的增量解码，并在每次追加后提取
//! 新近完成的句子（以 . ! ? 结尾）。跨片到达的键名与转义序列靠
//! 累积缓冲自然补齐：未凑齐的转义停在反斜杠处等待下一片。
//! 超长句在逗号/分号/破折号处再切，否则退到最后一个空白边界。

/// 增量句子提取器，一轮一个实例
pub struct SentenceExtractor {
    field: String,
    max_chunk_chars: usize,
    /// 原始流累积缓冲
    buffer: String,
    /// 字段值起点（缓冲内字节偏移）；None 表示键尚未定位
    value_start: Option<usize>,
    /// 缓冲中已解码进 value 的字节数
    raw_consumed: usize,
    /// 已解码的字段值（去转义后）
    value: String,
    /// 值的闭引号是否已出现
    value_closed: bool,
    /// value 中已作为句子下发的字节数
    emitted: usize,
}

impl SentenceExtractor {
    pub fn new(field: impl Into<String>, max_chunk_chars: usize) -> Self {
        Self {
            field: field.into(),
            max_chunk_chars,
            buffer: String::new(),
            value_start: None,
            raw_consumed: 0,
            value: String::new(),
            value_closed: false,
            emitted: 0,
        }
    }

    /// 朗读字段是否已在流中定位到
    pub fn field_found(&self) -> bool {
        self.value_start.is_some()
    }

    /// 追加一个流片段，返回新完成的合成块（按出现顺序）
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        if !self.locate_value() {
            return Vec::new();
        }
        self.decode_value();
        self.take_completed(self.value_closed)
    }

    /// 流结束：下发未带终止符的尾部残句
    pub fn finish(&mut self) -> Vec<String> {
        if self.value_start.is_none() {
            return Vec::new();
        }
        self.decode_value();
        let mut chunks = self.take_completed(true);
        let trailing = self.value[self.emitted..].trim();
        if !trailing.is_empty() {
            chunks.extend(split_chunk(trailing, self.max_chunk_chars));
        }
        self.emitted = self.value.len();
        chunks
    }

    /// 在缓冲中找 "field" : " 的序列；键或冒号跨片未到齐则下次再试
    fn locate_value(&mut self) -> bool {
        if self.value_start.is_some() {
            return true;
        }
        let pattern = format!("\"{}\"", self.field);
        let Some(key_idx) = self.buffer.find(&pattern) else {
            return false;
        };
        let bytes = self.buffer.as_bytes();
        let mut i = key_idx + pattern.len();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b':' {
            return false;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'"' {
            return false;
        }
        self.value_start = Some(i + 1);
        self.raw_consumed = i + 1;
        true
    }

    /// 把缓冲中新到的原始字节解码进 value，直到闭引号或数据耗尽
    fn decode_value(&mut self) {
        if self.value_closed {
            return;
        }
        let tail = self.buffer[self.raw_consumed..].to_string();
        let bytes = tail.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    self.value_closed = true;
                    i += 1;
                    break;
                }
                b'\\' => {
                    if i + 1 >= bytes.len() {
                        // 转义序列跨片，等下一片
                        break;
                    }
                    match bytes[i + 1] {
                        b'n' => {
                            self.value.push('\n');
                            i += 2;
                        }
                        b't' => {
                            self.value.push('\t');
                            i += 2;
                        }
                        b'r' => {
                            self.value.push('\r');
                            i += 2;
                        }
                        b'b' => {
                            self.value.push('\u{0008}');
                            i += 2;
                        }
                        b'f' => {
                            self.value.push('\u{000C}');
                            i += 2;
                        }
                        b'u' => {
                            if i + 6 > bytes.len() {
                                break;
                            }
                            match tail
                                .get(i + 2..i + 6)
                                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                                .and_then(char::from_u32)
                            {
                                Some(ch) => {
                                    self.value.push(ch);
                                    i += 6;
                                }
                                None => {
                                    // 非法 \u 序列按字面量处理，后续字符走普通拷贝
                                    self.value.push('u');
                                    i += 2;
                                }
                            }
                        }
                        _ => {
                            // \" \\ \/ 及未知转义：取反斜杠后的字符本身
                            if let Some(ch) = tail[i + 1..].chars().next() {
                                self.value.push(ch);
                                i += 1 + ch.len_utf8();
                            } else {
                                break;
                            }
                        }
                    }
                }
                _ => {
                    if let Some(ch) = tail[i..].chars().next() {
                        self.value.push(ch);
                        i += ch.len_utf8();
                    } else {
                        break;
                    }
                }
            }
        }
        self.raw_consumed += i;
    }

    /// 提取 value 中新完成的句子。非结尾处的终止符须已看到后继
    /// 空白才算完句，避免把小数点或截断的句尾当作句界。
    fn take_completed(&mut self, at_end: bool) -> Vec<String> {
        let tail = &self.value[self.emitted..];
        let mut out = Vec::new();
        let mut last_end = 0;
        let chars: Vec<(usize, char)> = tail.char_indices().collect();
        for (pos, &(i, c)) in chars.iter().enumerate() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let complete = match chars.get(pos + 1) {
                Some(&(_, next)) => next.is_whitespace(),
                None => at_end,
            };
            if complete {
                let sentence = tail[last_end..i + c.len_utf8()].trim();
                if !sentence.is_empty() {
                    out.extend(split_chunk(sentence, self.max_chunk_chars));
                }
                last_end = i + c.len_utf8();
            }
        }
        self.emitted += last_end;
        out
    }
}

/// 超长句切块：max 字符内找最后的逗号/分号/破折号，退而求其次找
/// 最后的空白，都没有就在字符边界硬切；剩余部分递归处理
pub fn split_chunk(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let limit = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..limit];

    let cut = head
        .rfind(&[',', ';', '—'][..])
        .map(|i| i + head[i..].chars().next().map_or(1, char::len_utf8))
        .or_else(|| head.rfind(char::is_whitespace))
        .unwrap_or(limit);

    let mut chunks = vec![text[..cut].trim().to_string()];
    chunks.extend(split_chunk(&text[cut..], max_chars));
    chunks.retain(|c| !c.is_empty());
    chunks
}

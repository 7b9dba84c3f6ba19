// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文本预处理模块
//!
//! 该模块实现了服务端 HTML 的指令展开引擎。对输入文本做单次
//! 从左到右的扫描，识别 `$` 引导的记号：
//! - `$$` 输出一个字面 `$`。
//! - `$name` 是变量引用，在环境表中按小写名查找并替换。
//! - `$name{ <json> }` 是指令调用，参数是一个花括号配平的 JSON 对象，
//!   按指令名分派到 `def` / `embed` / `if` / `literal`。
//!
//! `embed` 与 `if` 的结果会被送回同一扫描器递归展开，嵌套指令在
//! 外层输出之前完全解析；`literal` 的结果逐字输出，不再处理。
//!
//! ## 常量模式
//! 页面内容分两遍处理：常量遍只执行 `const:` 前缀的记号，其余记号
//! 原样透传，结果可以缓存；请求遍在常量遍的输出上执行剩余记号，
//! 注入每请求的变量（对端地址、用户名等）。

use std::collections::HashMap;

use serde_json::Value;

use crate::exception::HttpException;

/// 指令哨兵字符
const INITIATOR: char = '$';

/// 未知指令名的替换结果
const UNKNOWN_FUNCTION: &str = "UNKNOWN_FUNCTION";

/// 常量遍记号的名称前缀
const CONSTANT_PREFIX: &str = "const:";

/// 预处理器对外部内容的依赖。
///
/// `embed` 指令通过该接口加载资源并按需渲染 markdown，
/// 预处理器本身不关心资源来自何处。
pub trait PreProcessSource {
    /// 按逻辑名加载文本资源，返回内容与可选的媒体类型。
    fn load_text(&self, name: &str) -> Result<(String, Option<String>), HttpException>;

    /// 把 markdown 源文本渲染为 HTML。
    fn render_markdown(&self, source: &str) -> String;
}

/// 指令展开引擎。
///
/// 环境表在单次处理过程中可变（`def` 新增的条目对同一遍中
/// 之后的记号可见），各请求使用相互独立的实例。
pub struct PreProcessor<'a, S: PreProcessSource> {
    source: &'a S,
    env: HashMap<String, String>,
    constant_mode: bool,
}

impl<'a, S: PreProcessSource> PreProcessor<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            env: HashMap::new(),
            constant_mode: false,
        }
    }

    /// 切换到常量模式：只执行 `const:` 前缀的记号，其余原样透传。
    pub fn constant_mode(mut self, enabled: bool) -> Self {
        self.constant_mode = enabled;
        self
    }

    /// 向环境表写入一个变量，键按小写存储。
    pub fn define(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_lowercase(), value.to_string());
    }

    /// 展开输入文本中的全部记号。
    ///
    /// 扫描到输入末尾时，尚未终结的变量记号按变量引用处理后输出，
    /// 不会被静默丢弃。
    pub fn process(&mut self, input: &str) -> Result<String, HttpException> {
        let chars: Vec<char> = input.chars().collect();
        let mut output = String::with_capacity(input.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c != INITIATOR {
                output.push(c);
                i += 1;
                continue;
            }

            i += 1;
            if i >= chars.len() {
                output.push(INITIATOR);
                break;
            }
            if chars[i] == INITIATOR {
                output.push(INITIATOR);
                i += 1;
                continue;
            }

            // 哨兵之后的第一个字符无条件进入记号缓冲区
            let mut token = String::new();
            token.push(chars[i]);
            i += 1;
            while i < chars.len() && is_identifier_char(chars[i]) {
                token.push(chars[i]);
                i += 1;
            }

            if i < chars.len() && chars[i] == '{' {
                let argument = read_braced(&chars, &mut i)?;
                output.push_str(&self.expand_function(&token, &argument)?);
            } else {
                // 终结字符不被消耗，由外层循环照常处理
                output.push_str(&self.expand_variable(&token));
            }
        }

        Ok(output)
    }

    /// 变量引用：按小写名查找环境表，未定义时原样回显记号本身，
    /// 保证输出确定且问题可见。
    fn expand_variable(&self, token: &str) -> String {
        let name = match token.strip_prefix(CONSTANT_PREFIX) {
            Some(rest) => rest,
            None if self.constant_mode => return format!("{}{}", INITIATOR, token),
            None => token,
        };
        match self.env.get(&name.to_lowercase()) {
            Some(value) => value.clone(),
            None => format!("{}{}", INITIATOR, token),
        }
    }

    /// 指令调用：解析 JSON 参数并按名分派。
    ///
    /// 常量模式下无前缀的指令连同参数原样透传，留给请求遍执行。
    fn expand_function(&mut self, token: &str, argument: &str) -> Result<String, HttpException> {
        let name = match token.strip_prefix(CONSTANT_PREFIX) {
            Some(rest) => rest,
            None if self.constant_mode => {
                return Ok(format!("{}{}{}", INITIATOR, token, argument));
            }
            None => token,
        };

        let value: Value = serde_json::from_str(argument)
            .map_err(|e| HttpException::server("malformed directive argument", e))?;

        match name {
            "def" => self.function_def(&value),
            "embed" => self.function_embed(&value),
            "if" => self.function_if(&value),
            "literal" => Ok(function_literal(&value)),
            _ => Ok(UNKNOWN_FUNCTION.to_string()),
        }
    }

    /// `def`：把参数对象的键值合并进环境表，键按小写存储，输出为空。
    fn function_def(&mut self, value: &Value) -> Result<String, HttpException> {
        if let Value::Object(entries) = value {
            for (key, entry) in entries {
                self.env
                    .insert(key.to_lowercase(), json_to_string(entry));
            }
        }
        Ok(String::new())
    }

    /// `embed`：加载 `src` 指定的资源，声明类型为 markdown 时先渲染为
    /// HTML，结果递归展开。
    fn function_embed(&mut self, value: &Value) -> Result<String, HttpException> {
        let name = value
            .get("src")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HttpException::Server(
                    "embed directive is missing the \"src\" key".to_string(),
                    None,
                )
            })?;

        let (text, media_type) = self.source.load_text(name)?;

        let declared_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(media_type);
        let is_markdown = matches!(
            declared_type.as_deref(),
            Some("md") | Some("text/markdown")
        );

        let text = if is_markdown {
            self.source.render_markdown(&text)
        } else {
            text
        };
        self.process(&text)
    }

    /// `if`：对照环境表求值条件，选取 `then` 或 `else` 分支并递归展开。
    ///
    /// 条件键：`defined`（变量已定义）、`true`（变量值为 `"true"`）、
    /// `false`（变量未定义或值不为 `"true"`）。给出的所有条件必须同时成立。
    fn function_if(&mut self, value: &Value) -> Result<String, HttpException> {
        let mut holds = true;

        if let Some(name) = value.get("defined").and_then(Value::as_str) {
            holds &= self.env.contains_key(&name.to_lowercase());
        }
        if let Some(name) = value.get("true").and_then(Value::as_str) {
            holds &= self
                .env
                .get(&name.to_lowercase())
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
        }
        if let Some(name) = value.get("false").and_then(Value::as_str) {
            holds &= !self
                .env
                .get(&name.to_lowercase())
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
        }

        let branch = if holds { "then" } else { "else" };
        match value.get(branch).and_then(Value::as_str) {
            Some(text) => self.process(&text.to_string()),
            None => Ok(String::new()),
        }
    }
}

/// `literal`：逐字返回 `value` 键的内容，不做任何再处理。
fn function_literal(value: &Value) -> String {
    match value.get("value") {
        Some(entry) => json_to_string(entry),
        None => String::new(),
    }
}

/// JSON 值转为环境表中的字符串：字符串取其内容而非带引号的序列化形式。
fn json_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':'
}

/// 读取一个花括号配平的参数片段（含两侧花括号），`i` 指向起始 `{`。
///
/// 返回时 `i` 位于收尾 `}` 之后；输入在配平前结束是模板错误。
fn read_braced(chars: &[char], i: &mut usize) -> Result<String, HttpException> {
    let mut depth = 0usize;
    let mut buffer = String::new();
    while *i < chars.len() {
        let c = chars[*i];
        buffer.push(c);
        *i += 1;
        if c == '{' {
            depth += 1;
        } else if c == '}' {
            depth -= 1;
            if depth == 0 {
                return Ok(buffer);
            }
        }
    }
    Err(HttpException::Server(
        "unexpected end of input inside a directive argument".to_string(),
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        files: HashMap<String, (String, Option<String>)>,
    }

    impl StubSource {
        fn new() -> Self {
            let mut files = HashMap::new();
            files.insert(
                "fragment".to_string(),
                ("<p>embedded $who</p>".to_string(), Some("text/html".to_string())),
            );
            files.insert(
                "article.md".to_string(),
                ("# Title".to_string(), Some("text/markdown".to_string())),
            );
            files.insert(
                "nested".to_string(),
                ("outer [$embed{\"src\":\"fragment\"}]".to_string(), None),
            );
            StubSource { files }
        }
    }

    impl PreProcessSource for StubSource {
        fn load_text(&self, name: &str) -> Result<(String, Option<String>), HttpException> {
            self.files
                .get(name)
                .cloned()
                .ok_or_else(|| HttpException::NotFound(name.to_string()))
        }

        fn render_markdown(&self, source: &str) -> String {
            format!("<h1>{}</h1>", source.trim_start_matches("# "))
        }
    }

    fn process(input: &str) -> String {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        pre.process(input).unwrap()
    }

    /// 双哨兵输出一个字面 `$`
    #[test]
    fn test_escaped_sentinel() {
        assert_eq!(process("price: $$5"), "price: $5");
        assert_eq!(process("$$"), "$");
    }

    /// 纯文本原样通过
    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(process("no directives here"), "no directives here");
    }

    /// def 定义的变量对同一遍中之后的记号可见
    #[test]
    fn test_def_then_variable() {
        assert_eq!(process("$def{\"x\":\"1\"}$x"), "1");
    }

    /// 输入末尾的变量记号照常展开，不被丢弃
    #[test]
    fn test_variable_flushed_at_end_of_input() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        pre.define("name", "world");
        assert_eq!(pre.process("hello $name").unwrap(), "hello world");
    }

    /// 变量名大小写不敏感
    #[test]
    fn test_variable_case_insensitive() {
        assert_eq!(process("$def{\"GREETING\":\"hi\"}$greeting"), "hi");
        assert_eq!(process("$def{\"greeting\":\"hi\"}$GREETING"), "hi");
    }

    /// 未定义变量回显记号本身
    #[test]
    fn test_undefined_variable_echoed() {
        assert_eq!(process("value: $missing!"), "value: $missing!");
    }

    /// 终结字符在替换之后重新输出
    #[test]
    fn test_terminator_reemitted() {
        assert_eq!(process("$def{\"x\":\"1\"}[$x]"), "[1]");
    }

    /// if 按 defined 条件选择分支
    #[test]
    fn test_if_defined() {
        assert_eq!(
            process("$if{\"defined\":\"x\",\"then\":\"yes\",\"else\":\"no\"}"),
            "no"
        );
        assert_eq!(
            process("$def{\"x\":\"1\"}$if{\"defined\":\"x\",\"then\":\"yes\",\"else\":\"no\"}"),
            "yes"
        );
    }

    /// if 按 true/false 条件选择分支
    #[test]
    fn test_if_truthiness() {
        assert_eq!(
            process("$def{\"flag\":\"true\"}$if{\"true\":\"flag\",\"then\":\"on\",\"else\":\"off\"}"),
            "on"
        );
        assert_eq!(
            process("$def{\"flag\":\"nope\"}$if{\"true\":\"flag\",\"then\":\"on\",\"else\":\"off\"}"),
            "off"
        );
        assert_eq!(
            process("$if{\"false\":\"flag\",\"then\":\"unset\",\"else\":\"set\"}"),
            "unset"
        );
    }

    /// if 的分支结果递归展开
    #[test]
    fn test_if_branch_recursive() {
        assert_eq!(
            process("$def{\"x\":\"1\",\"y\":\"deep\"}$if{\"defined\":\"x\",\"then\":\"[$y]\"}"),
            "[deep]"
        );
    }

    /// literal 逐字输出，不做再处理
    #[test]
    fn test_literal_verbatim() {
        assert_eq!(
            process("$literal{\"value\":\"$def{\\\"x\\\":\\\"1\\\"} raw\"}"),
            "$def{\"x\":\"1\"} raw"
        );
    }

    /// literal 的字符串值不带引号
    #[test]
    fn test_literal_unquoted_string() {
        assert_eq!(process("$literal{\"value\":\"plain\"}"), "plain");
        assert_eq!(process("$literal{\"value\":42}"), "42");
    }

    /// 未知指令名替换为标记而不是让整页失败
    #[test]
    fn test_unknown_function_marker() {
        assert_eq!(process("$frobnicate{\"a\":1}"), UNKNOWN_FUNCTION);
    }

    /// embed 加载资源并递归展开其中的记号
    #[test]
    fn test_embed_recursive() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        pre.define("who", "reader");
        assert_eq!(
            pre.process("$embed{\"src\":\"fragment\"}").unwrap(),
            "<p>embedded reader</p>"
        );
    }

    /// 嵌套的 embed 在外层输出之前完全解析
    #[test]
    fn test_embed_nested() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        pre.define("who", "x");
        assert_eq!(
            pre.process("$embed{\"src\":\"nested\"}").unwrap(),
            "outer [<p>embedded x</p>]"
        );
    }

    /// markdown 类型的 embed 先渲染为 HTML
    #[test]
    fn test_embed_markdown() {
        assert_eq!(
            process("$embed{\"src\":\"article.md\"}"),
            "<h1>Title</h1>"
        );
        assert_eq!(
            process("$embed{\"src\":\"article.md\",\"type\":\"md\"}"),
            "<h1>Title</h1>"
        );
    }

    /// 参数对象中的嵌套花括号按深度配平
    #[test]
    fn test_balanced_braces() {
        assert_eq!(
            process("$def{\"a\":\"{inner}\"}$a"),
            "{inner}"
        );
    }

    /// 未配平的参数是错误
    #[test]
    fn test_unterminated_argument() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        assert!(pre.process("$def{\"x\":\"1\"").is_err());
    }

    /// 非法 JSON 参数是错误
    #[test]
    fn test_malformed_argument() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source);
        assert!(pre.process("$def{not json}").is_err());
    }

    /// 常量模式只执行 const: 前缀的记号
    #[test]
    fn test_constant_mode() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source).constant_mode(true);
        let output = pre
            .process("$const:def{\"site\":\"home\"}$const:site | $user.name")
            .unwrap();
        assert_eq!(output, "home | $user.name");
    }

    /// 常量模式下无前缀指令连同参数原样透传
    #[test]
    fn test_constant_mode_passthrough_function() {
        let source = StubSource::new();
        let mut pre = PreProcessor::new(&source).constant_mode(true);
        let output = pre
            .process("$if{\"defined\":\"u\",\"then\":\"y\"}")
            .unwrap();
        assert_eq!(output, "$if{\"defined\":\"u\",\"then\":\"y\"}");
    }

    /// 请求遍照常执行常量遍透传下来的记号
    #[test]
    fn test_two_pass_pipeline() {
        let source = StubSource::new();
        let input = "$const:def{\"title\":\"Home\"}<h1>$const:title</h1><p>hi $user.name</p>";

        let mut constant_pass = PreProcessor::new(&source).constant_mode(true);
        let intermediate = constant_pass.process(input).unwrap();
        assert_eq!(intermediate, "<h1>Home</h1><p>hi $user.name</p>");

        let mut request_pass = PreProcessor::new(&source);
        request_pass.define("user.name", "alice");
        assert_eq!(
            request_pass.process(&intermediate).unwrap(),
            "<h1>Home</h1><p>hi alice</p>"
        );
    }

    /// 输入末尾孤立的哨兵原样输出
    #[test]
    fn test_trailing_sentinel() {
        assert_eq!(process("done$"), "done$");
    }
}

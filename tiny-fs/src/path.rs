//! 路径解析的字符串工具。
//!
//! 路径以`/`分隔，开头的`/`表示绝对路径；尾随`/`可以容忍。
//! `.` 与 `..` 留到逐目录解析时处理。

pub trait Path {
    fn is_absolute(&self) -> bool;

    /// 返回路径的`(目录前缀, 最终组件)`。
    ///
    /// 没有目录前缀时，绝对路径的前缀是`/`，相对路径是空串；
    /// 整条路径是根时，最终组件为空串。
    fn parent_file(&self) -> (&str, &str);

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn parent_file(&self) -> (&str, &str) {
        let trimmed = self.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some(("", file)) => ("/", file),
            Some(split) => split,
            None if self.is_absolute() => ("/", trimmed),
            None => ("", trimmed),
        }
    }
}

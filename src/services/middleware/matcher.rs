use std::collections::HashMap;

/// 全局选择器
pub const GLOBAL_SELECTOR: &str = "/*";

/// 按方法选择器匹配中间件
///
/// 支持的选择器：
/// - `/*`：所有方法
/// - `/helloworld.Greeter/*`：某个服务下的所有方法
/// - `/helloworld.Greeter/SayHello`：单个方法
///
/// 匹配结果总是先包含全局中间件，随后是精确匹配；没有精确匹配时使用最长的前缀匹配。
#[derive(Debug, Clone)]
pub struct Matcher<M> {
    defaults: Vec<M>,
    // 前缀按字典序倒序排列，保证更长的前缀先被检查
    prefixes: Vec<String>,
    entries: HashMap<String, Vec<M>>,
}

impl<M> Default for Matcher<M> {
    fn default() -> Self {
        Self {
            defaults: Vec::new(),
            prefixes: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<M: Clone> Matcher<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全局中间件
    pub fn use_global(&mut self, middlewares: impl IntoIterator<Item = M>) {
        self.defaults.extend(middlewares);
    }

    /// 按选择器注册中间件
    pub fn add(&mut self, selector: &str, middlewares: impl IntoIterator<Item = M>) {
        if selector == GLOBAL_SELECTOR {
            self.use_global(middlewares);
            return;
        }

        let key = match selector.strip_suffix('*') {
            Some(prefix) => {
                if !self.prefixes.iter().any(|p| p == prefix) {
                    self.prefixes.push(prefix.to_string());
                    self.prefixes.sort_by(|a, b| b.cmp(a));
                }
                prefix.to_string()
            }
            None => selector.to_string(),
        };

        self.entries.entry(key).or_default().extend(middlewares);
    }

    /// 返回作用于指定方法的中间件列表
    pub fn matches(&self, full_method: &str) -> Vec<M> {
        let mut matched = self.defaults.clone();

        if let Some(exact) = self.entries.get(full_method) {
            matched.extend(exact.iter().cloned());
            return matched;
        }

        if let Some(prefix) = self
            .prefixes
            .iter()
            .find(|prefix| full_method.starts_with(prefix.as_str()))
            && let Some(entries) = self.entries.get(prefix)
        {
            matched.extend(entries.iter().cloned());
        }

        matched
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty() && self.entries.is_empty()
    }
}

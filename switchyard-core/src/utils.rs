//! 工具函数

/// 命名规则
pub mod naming {
    use crate::types::TypeKey;

    /// PascalCase 转 camelCase：`UserService` -> `userService`
    ///
    /// ```
    /// use switchyard_core::utils::naming::to_camel_case;
    ///
    /// assert_eq!(to_camel_case("UserService"), "userService");
    /// assert_eq!(to_camel_case(""), "");
    /// ```
    pub fn to_camel_case(s: &str) -> String {
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => {
                let mut result = String::with_capacity(s.len());
                result.extend(first.to_lowercase());
                result.push_str(chars.as_str());
                result
            }
        }
    }

    /// 类型的默认对象名：去掉模块路径和泛型参数后转 camelCase
    pub fn bean_name_for(ty: &TypeKey) -> String {
        let simple = ty.simple_name();
        let simple = simple.split('<').next().unwrap_or(simple);
        to_camel_case(simple)
    }

}

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use switchyard_core::Value;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub tags: Vec<String>,
}

impl User {
    /// 视图模型
    pub fn to_value(&self) -> Value {
        let mut entries = Vec::new();
        Value::map_insert(&mut entries, "id".into(), Value::Int(self.id));
        Value::map_insert(&mut entries, "name".into(), Value::str(&self.name));
        Value::map_insert(&mut entries, "email".into(), Value::str(&self.email));
        Value::map_insert(
            &mut entries,
            "tags".into(),
            Value::Array(self.tags.iter().map(Value::str).collect()),
        );
        Value::Map(entries)
    }
}

pub struct UserService {
    users: RwLock<Vec<User>>,
    next_id: AtomicI64,
}

impl UserService {
    pub fn with_samples() -> Self {
        let users = vec![
            User {
                id: 1,
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                tags: vec!["admin".to_string()],
            },
            User {
                id: 2,
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                tags: vec!["ops".to_string(), "dev".to_string()],
            },
        ];
        Self {
            users: RwLock::new(users),
            next_id: AtomicI64::new(3),
        }
    }

    /// 没有标签时返回全部用户
    pub fn list(&self, tags: &[String]) -> Vec<User> {
        self.users
            .read()
            .iter()
            .filter(|u| tags.is_empty() || tags.iter().any(|t| u.tags.contains(t)))
            .cloned()
            .collect()
    }

    /// 按字段精确过滤，支持 `name` 和 `email`
    pub fn search(&self, filter: &HashMap<String, String>) -> Vec<User> {
        self.users
            .read()
            .iter()
            .filter(|u| {
                filter.iter().all(|(field, expected)| match field.as_str() {
                    "name" => &u.name == expected,
                    "email" => &u.email == expected,
                    _ => true,
                })
            })
            .cloned()
            .collect()
    }

    pub fn find(&self, id: i64) -> Option<User> {
        self.users.read().iter().find(|u| u.id == id).cloned()
    }

    pub fn create(&self, name: String, email: String) -> User {
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name,
            email,
            tags: Vec::new(),
        };
        self.users.write().push(user.clone());
        tracing::info!("Created user {} ({})", user.id, user.name);
        user
    }

    pub fn delete(&self, id: i64) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|u| u.id != id);
        users.len() != before
    }
}

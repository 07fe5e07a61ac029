//! 应用引导
//!
//! 加载配置文件（默认 + profile）、环境变量，初始化日志，构建容器并执行初始化器。

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::config::{EnvironmentPropertySource, TomlPropertySource};
use crate::container::{ApplicationContext, ApplicationContextBuilder};
use crate::logging::LoggingConfig;

type Initializer = Box<dyn Fn(&Arc<ApplicationContext>) -> anyhow::Result<()> + Send + Sync>;

/// Switchyard 应用
pub struct SwitchyardApplication {
    name: String,
    config_files: Vec<String>,
    env_prefix: String,
    profiles: Vec<String>,
    show_banner: bool,
    /// 未设置时从配置环境读取
    logging_config: Option<LoggingConfig>,
    initializers: Vec<Initializer>,
}

impl SwitchyardApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_files: vec!["application.toml".to_string()],
            env_prefix: "APP_".to_string(),
            profiles: Vec::new(),
            show_banner: true,
            logging_config: None,
            initializers: Vec::new(),
        }
    }

    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_files = vec![path.into()];
        self
    }

    pub fn config_files(mut self, paths: Vec<String>) -> Self {
        self.config_files = paths;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn banner(mut self, show: bool) -> Self {
        self.show_banner = show;
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    /// 添加初始化器，按添加顺序在容器构建后执行
    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<ApplicationContext>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.initializers.push(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 构建容器并执行全部初始化器
    pub fn run(self) -> anyhow::Result<Arc<ApplicationContext>> {
        let start_time = Instant::now();

        // 优先级：代码设置 > 环境变量 {prefix}PROFILES_ACTIVE
        let active_profiles = if self.profiles.is_empty() {
            std::env::var(format!("{}PROFILES_ACTIVE", self.env_prefix))
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        } else {
            self.profiles.clone()
        };

        let mut builder = ApplicationContext::builder();
        builder = self.load_configurations(builder, &active_profiles)?;
        builder = builder
            .add_property_source(Box::new(EnvironmentPropertySource::new(&self.env_prefix)))
            .set_active_profiles(active_profiles.clone());
        let context = builder.build();

        let logging_config = self
            .logging_config
            .clone()
            .unwrap_or_else(|| LoggingConfig::from_environment(context.environment()));
        if let Err(e) = logging_config.init() {
            // 测试或宿主程序可能已经安装了订阅者
            tracing::debug!("Keeping existing subscriber: {}", e);
        }

        if self.show_banner {
            self.print_banner();
        }

        tracing::info!("Starting {} application", self.name);
        if active_profiles.is_empty() {
            tracing::info!("No active profiles set, using default configuration");
        } else {
            tracing::info!("Active profiles: {:?}", active_profiles);
        }

        for (index, initializer) in self.initializers.iter().enumerate() {
            initializer(&context).with_context(|| format!("Initializer #{} failed", index))?;
        }

        tracing::info!(
            "Started {} in {}ms",
            self.name,
            start_time.elapsed().as_millis()
        );
        Ok(context)
    }

    /// 加载顺序（优先级从低到高）：`application.toml`，`application-{profile}.toml`
    fn load_configurations(
        &self,
        mut builder: ApplicationContextBuilder,
        active_profiles: &[String],
    ) -> anyhow::Result<ApplicationContextBuilder> {
        for base in &self.config_files {
            builder = Self::try_load_config_file(builder, base, 0)?;
        }
        for (index, profile) in active_profiles.iter().enumerate() {
            for base in &self.config_files {
                let path = profile_config_path(base, profile);
                builder = Self::try_load_config_file(builder, &path, 10 + index as i32)?;
            }
        }
        Ok(builder)
    }

    fn try_load_config_file(
        builder: ApplicationContextBuilder,
        path: &str,
        priority: i32,
    ) -> anyhow::Result<ApplicationContextBuilder> {
        if !Path::new(path).exists() {
            tracing::debug!("Configuration file not found: {}", path);
            return Ok(builder);
        }
        let source = TomlPropertySource::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path))?;
        tracing::info!("Loaded configuration from: {} (priority: {})", path, priority);
        Ok(builder.add_property_source(Box::new(source.with_priority(priority))))
    }

    fn print_banner(&self) {
        println!();
        println!(r"  ___        _ _      _                         _ ");
        println!(r" / __|_ __ _(_) |_ __| |_ _  _ __ _ _ _ __| |");
        println!(r" \__ \ V  V / |  _/ _| ' \ || / _` | '_/ _` |");
        println!(r" |___/\_/\_/|_|\__\__|_||_\_, \__,_|_| \__,_|");
        println!(r"                          |__/               ");
        println!();
        println!("  :: Switchyard ::        (v{})", env!("CARGO_PKG_VERSION"));
        println!();
    }
}

impl Default for SwitchyardApplication {
    fn default() -> Self {
        Self::new("SwitchyardApplication")
    }
}

/// `application.toml` -> `application-dev.toml`
fn profile_config_path(base: &str, profile: &str) -> String {
    match base.rfind('.') {
        Some(dot) => {
            let (name, ext) = base.split_at(dot);
            format!("{}-{}{}", name, profile, ext)
        }
        None => format!("{}-{}", base, profile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerExt;

    #[test]
    fn test_profile_config_path() {
        assert_eq!(profile_config_path("application.toml", "dev"), "application-dev.toml");
        assert_eq!(profile_config_path("conf/app", "prod"), "conf/app-prod");
    }

    #[test]
    fn test_run_executes_initializers() {
        let context = SwitchyardApplication::new("test")
            .banner(false)
            .config_file("does-not-exist.toml")
            .profiles(vec!["test".into()])
            .initializer(|ctx| {
                ctx.register_singleton(String::from("hello"))?;
                Ok(())
            })
            .run()
            .unwrap();

        assert_eq!(*context.get_bean_by_type::<String>().unwrap(), "hello");
        assert!(context.environment().accepts_profile("test"));
    }

    #[test]
    fn test_failing_initializer_carries_context() {
        let err = SwitchyardApplication::new("test")
            .banner(false)
            .config_file("does-not-exist.toml")
            .initializer(|_| anyhow::bail!("no database"))
            .run()
            .unwrap_err();

        assert_eq!(err.to_string(), "Initializer #0 failed");
        assert_eq!(err.root_cause().to_string(), "no database");
    }
}

//! Switchyard Web 示例
//!
//! ```text
//! curl http://127.0.0.1:8080/users?tag=dev
//! curl "http://127.0.0.1:8080/search/users?filter[name]=Alice"
//! curl http://127.0.0.1:8080/users/1
//! curl -X POST "http://127.0.0.1:8080/users?name=Carol&email=carol@example.com"
//! curl -H "authorization: Bearer carol" http://127.0.0.1:8080/me
//! ```

mod controller;
mod service;

use anyhow::Context;
use switchyard_aop::{register_interceptor, LoggingInterceptor, MethodKey, TimingInterceptor};
use switchyard_core::{SwitchyardApplication, TypeKey};
use switchyard_web::prelude::*;
use switchyard_web::{DispatcherBuilder, DispatcherRouter};

use crate::controller::{CurrentUserInterceptor, Unauthorized, UserController, UserNotFound};
use crate::service::UserService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let context = SwitchyardApplication::new("web-demo")
        .config_file("demos/web-demo/application.toml")
        .env_prefix("DEMO_")
        .initializer(|ctx| {
            ctx.register_singleton(UserService::with_samples())?;
            register_interceptor(ctx, LoggingInterceptor::new())?;
            register_interceptor(ctx, TimingInterceptor::default())?;
            register_interceptor(ctx, CurrentUserInterceptor)?;
            Ok(())
        })
        .run()?;

    let env = context.environment();
    let views = TeraViewRenderer::from_environment(env).context("Failed to load view templates")?;

    let dispatcher = DispatcherBuilder::from_environment(env)
        .container(context.clone())
        .view_renderer(views)
        .intercept_type(TypeKey::of::<UserController>(), TypeKey::of::<TimingInterceptor>())
        .intercept_method(
            MethodKey::of::<UserController>("create"),
            TypeKey::of::<LoggingInterceptor>(),
        )
        .intercept_method(
            MethodKey::of::<UserController>("me"),
            TypeKey::of::<CurrentUserInterceptor>(),
        )
        .exception_handler::<UserNotFound, _>(controller::not_found)
        .exception_handler::<Unauthorized, _>(controller::unauthorized)
        .controller(UserController::definition())
        .build()
        .context("Failed to build dispatcher")?;

    WebServer::from_environment(env, DispatcherRouter::single(dispatcher))?
        .run()
        .await?;

    Ok(())
}

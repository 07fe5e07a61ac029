use std::collections::HashMap;
use std::sync::Arc;

use switchyard_aop::{MethodInterceptor, ProceedingJoinPoint};
use switchyard_core::{CallResult, ThrownError, Value};
use switchyard_web::prelude::*;
use thiserror::Error;

use crate::service::UserService;

#[derive(Debug, Error)]
#[error("User {0} not found")]
pub struct UserNotFound(pub i64);

#[derive(Debug, Error)]
#[error("Missing or invalid authorization token")]
pub struct Unauthorized;

pub struct UserController;

impl UserController {
    pub fn definition() -> ControllerDefinition {
        ControllerDefinition::new(UserController)
            .method(
                HandlerMethod::with_request("list", RouteMapping::get("/users"), |_: &UserController, ctx: &RequestContext, args| {
                    let service: Arc<UserService> = args.value(0)?;
                    let tags: Vec<String> = args.value(1)?;
                    ctx.response().set_header("content-type", "application/json")?;
                    Ok(Value::str(serde_json::to_string(&service.list(&tags))?))
                })
                .param(Parameter::bean::<UserService>("service"))
                .param(Parameter::of::<Vec<String>>("tag").query("tag").optional())
                .write(),
            )
            .method(
                HandlerMethod::with_request("search", RouteMapping::get("/search/users"), |_: &UserController, ctx: &RequestContext, args| {
                    let service: Arc<UserService> = args.value(0)?;
                    let filter: HashMap<String, String> = args.value(1)?;
                    ctx.response().set_header("content-type", "application/json")?;
                    Ok(Value::str(serde_json::to_string(&service.search(&filter))?))
                })
                .param(Parameter::bean::<UserService>("service"))
                .param(Parameter::of::<HashMap<String, String>>("filter").query("filter").optional())
                .write(),
            )
            .method(
                HandlerMethod::new("show", RouteMapping::get("/users/{id}"), |_: &UserController, args| {
                    let service: Arc<UserService> = args.value(0)?;
                    let id: i64 = args.value(1)?;
                    match service.find(id) {
                        Some(user) => Ok(user.to_value()),
                        None => Err(UserNotFound(id).into()),
                    }
                })
                .param(Parameter::bean::<UserService>("service"))
                .param(Parameter::of::<i64>("id").path("id"))
                .view("user"),
            )
            .method(
                HandlerMethod::new("create", RouteMapping::post("/users"), |_: &UserController, args| {
                    let service: Arc<UserService> = args.value(0)?;
                    let name: String = args.value(1)?;
                    let email: String = args.value(2)?;
                    Ok(Value::Int(service.create(name, email).id))
                })
                .param(Parameter::bean::<UserService>("service"))
                .param(Parameter::of::<String>("name").query("name"))
                .param(Parameter::of::<String>("email").query("email"))
                .redirect("/users/{0}"),
            )
            .method(
                HandlerMethod::new("delete", RouteMapping::delete("/users/{id}"), |_: &UserController, args| {
                    let service: Arc<UserService> = args.value(0)?;
                    let id: i64 = args.value(1)?;
                    if service.delete(id) {
                        Ok(Value::Null)
                    } else {
                        Err(UserNotFound(id).into())
                    }
                })
                .param(Parameter::bean::<UserService>("service"))
                .param(Parameter::of::<i64>("id").path("id"))
                .status(StatusCode::NO_CONTENT),
            )
            .method(
                HandlerMethod::new("me", RouteMapping::get("/me"), |_: &UserController, args| {
                    let user: String = args.value(1)?;
                    Ok(Value::str(format!("Hello, {}", user)))
                })
                .param(Parameter::of::<String>("token").header("authorization").optional())
                .param(Parameter::of::<String>("user").intercept())
                .write(),
            )
    }
}

/// 从 `token` 参数解析当前用户，填入 `user` 槽位
pub struct CurrentUserInterceptor;

impl MethodInterceptor for CurrentUserInterceptor {
    fn invoke(&self, invocation: &mut ProceedingJoinPoint<'_>) -> CallResult {
        let user = match invocation.join_point().named_arg("token") {
            Some(Value::Str(token)) if token.starts_with("Bearer ") => {
                token.trim_start_matches("Bearer ").to_string()
            }
            _ => return Err(Unauthorized.into()),
        };
        invocation.set_named_arg("user", Value::str(user));
        invocation.proceed()
    }

    fn name(&self) -> &str {
        "CurrentUserInterceptor"
    }
}

pub fn not_found(error: &ThrownError, ctx: &RequestContext) -> bool {
    let mut response = ctx.response();
    response.set_status(StatusCode::NOT_FOUND);
    response.write_str(&error.message());
    true
}

pub fn unauthorized(error: &ThrownError, ctx: &RequestContext) -> bool {
    let mut response = ctx.response();
    response.set_status(StatusCode::UNAUTHORIZED);
    response.write_str(&error.message());
    true
}

//! Server-rendered HTML pages.
//!
//! Every interpolated value goes through `html_escape`; passwords are never
//! written back into a form.

use axum::{http::StatusCode, response::Html};
use chrono::{DateTime, Utc};
use std::fmt::Write;

use super::flash::Flash;
use crate::db::User;
use crate::domain::CurrentUser;
use crate::services::FieldErrors;

const STYLE: &str = "
body { font-family: system-ui, sans-serif; margin: 0; background: #f5f6f8; color: #1f2328; }
header { display: flex; justify-content: space-between; align-items: center; padding: 0.75rem 1.5rem; background: #24292f; color: #fff; }
header form { margin: 0; }
main { max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
.card { background: #fff; border: 1px solid #d0d7de; border-radius: 6px; padding: 1.5rem; }
.auth { max-width: 420px; margin: 0 auto; }
label { display: block; margin-top: 0.75rem; font-weight: 600; }
input[type=text], input[type=email], input[type=password] { width: 100%; padding: 0.4rem; box-sizing: border-box; }
.field-error { color: #cf222e; font-size: 0.9rem; }
.flash-success { background: #dafbe1; border: 1px solid #4ac26b; padding: 0.75rem; margin-bottom: 1rem; }
.flash-error { background: #ffebe9; border: 1px solid #ff8182; padding: 0.75rem; margin-bottom: 1rem; }
.toolbar { display: flex; gap: 0.5rem; margin-bottom: 1rem; }
table { width: 100%; border-collapse: collapse; }
th, td { text-align: left; padding: 0.5rem; border-bottom: 1px solid #d0d7de; }
tr.blocked td { color: #8c959f; }
";

fn esc(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_text(value)
}

fn attr(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}

fn layout(title: &str, current: Option<&CurrentUser>, body: &str) -> Html<String> {
    let nav = current.map_or_else(
        || r#"<nav><a href="/login" style="color:#fff">Log in</a> · <a href="/register" style="color:#fff">Register</a></nav>"#.to_string(),
        |user| {
            format!(
                r#"<form method="post" action="/logout"><span>{}</span> <button type="submit">Log out</button></form>"#,
                esc(&user.name)
            )
        },
    );

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} · User Admin</title>
<style>{STYLE}</style>
</head>
<body>
<header><strong>User Admin</strong>{nav}</header>
<main>
{body}
</main>
</body>
</html>"#,
        title = esc(title),
    ))
}

fn flash_banner(flash: Option<&Flash>) -> String {
    flash.map_or_else(String::new, |f| {
        format!(
            r#"<div class="{}" role="alert">{}</div>"#,
            f.kind.css_class(),
            esc(&f.message)
        )
    })
}

fn field_error(errors: &FieldErrors, field: &str) -> String {
    errors.get(field).map_or_else(String::new, |msg| {
        format!(r#"<div class="field-error">{}</div>"#, esc(msg))
    })
}

fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "Never".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Values typed into the registration form, echoed back on a failed submit.
#[derive(Debug, Default)]
pub struct RegisterForm<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub errors: FieldErrors,
    pub message: Option<String>,
}

pub fn register_page(form: &RegisterForm<'_>) -> Html<String> {
    let message = form.message.as_ref().map(|m| Flash::error(m.as_str()));
    let banner = flash_banner(message.as_ref());

    let body = format!(
        r#"<div class="card auth">
<h1>Register</h1>
{banner}
<form method="post" action="/register">
<label for="name">Name</label>
<input type="text" id="name" name="name" value="{name}" required>
{name_error}
<label for="email">Email</label>
<input type="email" id="email" name="email" value="{email}" required>
{email_error}
<label for="password">Password</label>
<input type="password" id="password" name="password" required>
{password_error}
<p><button type="submit">Register</button></p>
</form>
<p>Already have an account? <a href="/login">Log in</a></p>
</div>"#,
        name = attr(form.name),
        email = attr(form.email),
        name_error = field_error(&form.errors, "name"),
        email_error = field_error(&form.errors, "email"),
        password_error = field_error(&form.errors, "password"),
    );

    layout("Register", None, &body)
}

#[derive(Debug, Default)]
pub struct LoginForm<'a> {
    pub email: &'a str,
    pub errors: FieldErrors,
    pub flash: Option<Flash>,
}

pub fn login_page(form: &LoginForm<'_>) -> Html<String> {
    let banner = flash_banner(form.flash.as_ref());

    let body = format!(
        r#"<div class="card auth">
<h1>Log in</h1>
{banner}
<form method="post" action="/login">
<label for="email">Email</label>
<input type="email" id="email" name="email" value="{email}" required>
{email_error}
<label for="password">Password</label>
<input type="password" id="password" name="password" required>
{password_error}
<p><button type="submit">Log in</button></p>
</form>
<p>No account yet? <a href="/register">Register</a></p>
</div>"#,
        email = attr(form.email),
        email_error = field_error(&form.errors, "email"),
        password_error = field_error(&form.errors, "password"),
    );

    layout("Log in", None, &body)
}

pub fn users_page(current: &CurrentUser, users: &[User], flash: Option<&Flash>) -> Html<String> {
    let mut rows = String::new();
    for user in users {
        let (class, status) = if user.is_blocked {
            (r#" class="blocked""#, "Blocked")
        } else {
            ("", "Active")
        };
        let you = if user.id == current.id { " (you)" } else { "" };

        let _ = write!(
            rows,
            r#"<tr{class}>
<td><input type="checkbox" name="user_ids" value="{id}" aria-label="Select {label}"></td>
<td>{name}{you}</td>
<td>{email}</td>
<td>{last_login}</td>
<td>{registered}</td>
<td>{status}</td>
</tr>
"#,
            id = user.id,
            label = attr(&user.name),
            name = esc(&user.name),
            email = esc(&user.email),
            last_login = format_timestamp(user.last_login_at),
            registered = format_timestamp(user.registered_at),
        );
    }

    let body = format!(
        r#"<div class="card">
<h1>Users</h1>
{banner}
<form method="post" action="/users/block">
<div class="toolbar">
<button type="submit" formaction="/users/block">Block</button>
<button type="submit" formaction="/users/unblock">Unblock</button>
<button type="submit" formaction="/users/delete">Delete</button>
</div>
<table>
<thead><tr><th></th><th>Name</th><th>Email</th><th>Last login</th><th>Registered</th><th>Status</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
</form>
</div>"#,
        banner = flash_banner(flash),
    );

    layout("Users", Some(current), &body)
}

pub fn error_page(status: StatusCode, message: &str) -> Html<String> {
    let title = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        r#"<div class="card"><h1>{code} {title}</h1><p>{message}</p><p><a href="/">Back</a></p></div>"#,
        code = status.as_u16(),
        title = esc(title),
        message = esc(message),
    );
    layout(title, None, &body)
}

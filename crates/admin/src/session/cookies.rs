// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use time::Duration;

pub const SESSION_COOKIE: &str = "gwadmin_session";
pub const DEVICE_COOKIE: &str = "gwadmin_device";

/// Session cookie; lives as long as the browser session.
pub fn session_cookie(session_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_owned()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Device cookie naming this browser. Reissued on every completed login.
pub fn device_cookie(device_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((DEVICE_COOKIE, device_id.to_owned()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::days(365))
        .build()
}

/// Removal cookie for the session.
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").max_age(Duration::ZERO).build()
}

pub fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()).filter(|v| !v.is_empty())
}

pub fn device_id(jar: &CookieJar) -> Option<String> {
    jar.get(DEVICE_COOKIE).map(|c| c.value().to_owned()).filter(|v| !v.is_empty())
}

/// Fresh opaque device identifier.
pub fn new_device_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
#[path = "cookies_tests.rs"]
mod tests;

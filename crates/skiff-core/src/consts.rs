//! Fixed descriptors of the single user, project and environment skiff serves.

use serde_json::{json, Value};
use uuid::Uuid;

pub const SERVER_FLAVOR: &str = "skiff";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PROJECT_ID: Uuid = Uuid::from_u128(0x422a_0000_0000_0000);
pub const ENVIRONMENT_ID: Uuid = Uuid::from_u128(0x2a42_0000_0000_0000);
pub const PROJECT_NAME: &str = "skiff-project";
pub const ENVIRONMENT_NAME: &str = "Skiff Environment";
pub const ENVIRONMENT_SLUG: &str = "skiff-environment";
pub const USER_ID: u64 = 42;

const FIXED_TIMESTAMP: &str = "2001-05-11T12:42:42.000000Z";

#[must_use]
pub fn limited_user_data() -> Value {
    json!({
        "id": USER_ID,
        "username": "skiff-user",
    })
}

#[must_use]
pub fn expanded_user_data() -> Value {
    let mut user = limited_user_data();
    if let Value::Object(fields) = &mut user {
        fields.insert("email".into(), json!("skiff-user@example.com"));
        fields.insert("first_name".into(), json!("Skiff"));
        fields.insert("last_name".into(), json!("User"));
    }
    user
}

#[must_use]
pub fn project_data() -> Value {
    json!({
        "id": PROJECT_ID,
        "name": PROJECT_NAME,
        "description": "",
        "owner": limited_user_data(),
        "ctime": FIXED_TIMESTAMP,
        "mtime": FIXED_TIMESTAMP,
        "url": format!("/api/v0/projects/{PROJECT_ID}/"),
        "urls": {},
        "execution_count": 0,
        "running_execution_count": 0,
        "queued_execution_count": 0,
        "enabled_endpoint_count": 0,
        "last_execution_ctime": null,
    })
}

#[must_use]
pub fn environment_data() -> Value {
    json!({
        "allow_personal_usage": true,
        "can_admin": false,
        "description": "",
        "enabled": true,
        "gpu_spec": "",
        "has_gpu": false,
        "id": ENVIRONMENT_ID,
        "name": ENVIRONMENT_NAME,
        "owner": expanded_user_data(),
        "per_hour_price_usd": "0.00000",
        "per_user_queue_quota": 0,
        "provider": null,
        "slug": ENVIRONMENT_SLUG,
        "unfinished_job_count": 0,
        "url": format!("/api/v0/environments/{ENVIRONMENT_ID}/"),
    })
}

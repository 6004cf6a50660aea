// Example user-agent shape, loosely following pip's:
//
//  nixpy/0.1.0 {"ci":null,"cpu":"x86_64","installer":{"name":"nixpy","version":"0.1.0"}}

use serde_json::json;

const CI_ENVIRONMENT_VARIABLES: &[&str] = &["BUILD_BUILDID", "BUILD_ID", "CI"];

fn looks_like_ci() -> Option<bool> {
    if CI_ENVIRONMENT_VARIABLES
        .iter()
        .any(|name| std::env::var_os(name).is_some())
    {
        Some(true)
    } else {
        None
    }
}

pub fn user_agent() -> String {
    let installer = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    let data = json!({
        "installer": {
            "name": &installer,
            "version": &version,
        },
        "ci": looks_like_ci(),
        "cpu": std::env::consts::ARCH,
    });

    format!(
        "{}/{} {}",
        installer,
        version,
        serde_json::to_string(&data).unwrap(),
    )
}

mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn root_banner_lists_endpoints() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client.get(&server.base_url).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let payload = res.json::<serde_json::Value>().await?;
    assert!(payload["success"].as_bool().unwrap_or(false));
    assert_eq!(payload["data"]["name"], "LinkLian API");
    assert!(payload["data"]["endpoints"]["import"]
        .as_str()
        .unwrap_or("")
        .contains("/api/import"));

    Ok(())
}

#[tokio::test]
async fn import_routes_require_bearer_auth() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/import/enrollment/validate", server.base_url))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["code"], "UNAUTHORIZED");

    Ok(())
}

use std::fs;

fn main() -> anyhow::Result<()> {
    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let doc = admin_authz::docs::build_openapi(port)?;
    let json = serde_json::to_string_pretty(&doc)?;

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    fs::write(&path, json)?;
    println!("wrote {}", path);
    Ok(())
}

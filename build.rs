fn main() {
    println!("cargo:rustc-env=BUILD_DATE={}", build_date());

    // A `.env` next to Cargo.toml may provide SPOTIFY_CLIENT_ID for dev builds.
    // Only the public client id is baked in; the secret is read at runtime.
    bake_client_id();
}

fn bake_client_id() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-env-changed=SPOTIFY_CLIENT_ID");

    if let Ok(id) = std::env::var("SPOTIFY_CLIENT_ID") {
        println!("cargo:rustc-env=SPOTIFY_CLIENT_ID={id}");
        return;
    }

    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in content.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        if let Some(("SPOTIFY_CLIENT_ID", value)) =
            line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
            && !value.is_empty()
        {
            println!("cargo:rustc-env=SPOTIFY_CLIENT_ID={value}");
        }
    }
}

fn build_date() -> String {
    // SOURCE_DATE_EPOCH keeps release builds reproducible.
    let mut cmd = std::process::Command::new("date");
    match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) => cmd.args(["-u", "-d", &format!("@{epoch}"), "+%Y-%m-%d"]),
        Err(_) => cmd.args(["-u", "+%Y-%m-%d"]),
    };
    cmd.output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

// Embed the git short hash for `chatreel --version`. Builds outside a checkout get no hash.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    else {
        return;
    };
    if !output.status.success() {
        return;
    }
    if let Ok(hash) = String::from_utf8(output.stdout) {
        let hash = hash.trim();
        if !hash.is_empty() {
            println!("cargo:rustc-env=CHATREEL_GIT_HASH={hash}");
        }
    }
}

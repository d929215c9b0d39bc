fn main() {
    // option_env!() values are cached by cargo unless we ask for a rebuild.
    println!("cargo:rerun-if-env-changed=SYNC_DEFAULT_API_BASE_URL");
}

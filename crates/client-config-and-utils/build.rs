fn main() {
    // option_env!() values are cached between builds unless cargo is told
    // to watch them.
    println!("cargo:rerun-if-env-changed=CARDKING_API_BASE_URL");
    println!("cargo:rerun-if-env-changed=CARDKING_APP_KEY");
}

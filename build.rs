fn main() {
    println!("cargo:rerun-if-env-changed=LIBARCHIVE_NO_PKG_CONFIG");

    if std::env::var_os("LIBARCHIVE_NO_PKG_CONFIG").is_none() {
        // on success pkg-config emits the link and search path lines itself
        match pkg_config::Config::new()
            .atleast_version("3.0")
            .probe("libarchive")
        {
            Ok(_) => return,
            Err(e) => println!("cargo:warning=pkg-config could not find libarchive: {e}"),
        }
    }

    println!("cargo:rustc-link-lib=archive");
}

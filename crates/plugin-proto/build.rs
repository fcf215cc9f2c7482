fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the vendored compiler when the host has no protoc.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| format!("vendored protoc unavailable: {e:?}"))?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/pluginv2.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/pluginv2.proto");
    Ok(())
}

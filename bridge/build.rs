fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Central proto repo is at ../proto/ relative to bridge/
    let proto_root = "../proto";
    let bridge_proto = format!("{proto_root}/silta/v1/bridge.proto");

    // Tell Cargo to rerun if the proto file changes
    println!("cargo:rerun-if-changed={bridge_proto}");

    // Skip proto compilation if source doesn't exist (CI uses pre-generated file)
    if !std::path::Path::new(&bridge_proto).exists() {
        println!("cargo:warning=Proto source not found, using pre-generated file");
        return Ok(());
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir("src/proto")
        .compile_protos(&[&bridge_proto], &[proto_root])?;

    Ok(())
}

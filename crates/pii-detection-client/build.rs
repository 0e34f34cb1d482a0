fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_server(false).compile(
        &["proto/detection.proto"],
        &["proto"],
    )?;
    println!("cargo:rerun-if-changed=proto/detection.proto");
    Ok(())
}

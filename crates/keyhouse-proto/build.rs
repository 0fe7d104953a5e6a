// Build script to compile protobuf files into Rust code.
//
// Generates message structs and tonic service traits for the public query
// service, the internal shard-to-shard lookup service, and the delta file
// record types.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::configure().compile(
        &[
            "proto/keyvalue_service.proto",
            "proto/internal_lookup.proto",
            "proto/data_loading.proto",
            "proto/udf_hooks.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}

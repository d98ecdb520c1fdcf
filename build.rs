//! Generates the gRPC client/server stubs for the `socialgraph` services.
//!
//! Messages are declared by hand in `src/proto.rs`, so only the service
//! plumbing is generated here.

use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "socialgraph";
const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path(CODEC)
        .build()
}

fn main() {
    let social_graph = Service::builder()
        .name("SocialGraph")
        .package(PACKAGE)
        .method(method("insert_data", "InsertData", "Transaction", "Ack"))
        .method(method("get_edges", "GetEdges", "NodeId", "EdgeList"))
        .build();

    let shard = Service::builder()
        .name("ShardParticipant")
        .package(PACKAGE)
        .method(method("prepare", "Prepare", "Transaction", "Vote"))
        .method(method("commit", "Commit", "Transaction", "Ack"))
        .method(method("abort", "Abort", "AbortRequest", "Ack"))
        .method(method("get_edges", "GetEdges", "NodeId", "EdgeList"))
        .build();

    let consensus = Service::builder()
        .name("Consensus")
        .package(PACKAGE)
        .method(method(
            "request_vote",
            "RequestVote",
            "VoteRequest",
            "VoteResponse",
        ))
        .method(method(
            "append_entries",
            "AppendEntries",
            "AppendEntriesRequest",
            "AppendEntriesResponse",
        ))
        .build();

    Builder::new().compile(&[social_graph, shard, consensus]);

    println!("cargo:rerun-if-changed=build.rs");
}

//! The two `rpc_pb::service!`-declared services that make up the peer wire protocol: one for the
//! acceptor's prepare/accept, one for everything the learner/log/snapshot engine answer during
//! steady-state learning and crash recovery.

use rpc_pb::service;

use scooter_wire::Error;

use crate::messages::{
    AcceptRequest, AcceptResponse, DescribeStateRequest, DescribeStateResponse,
    FetchLogRangeRequest, FetchLogRangeResponse, FetchSnapshotRequest, FetchSnapshotResponse,
    LearnRequest, LearnResponse, PrepareRequest, PrepareResponse,
};

service! {
    name = AcceptorService;
    server = AcceptorServer;
    client = AcceptorClient;
    error = Error;

    rpc prepare(PrepareRequest) -> PrepareResponse;
    rpc accept(AcceptRequest) -> AcceptResponse;
}

service! {
    name = ReplicationService;
    server = ReplicationServer;
    client = ReplicationClient;
    error = Error;

    rpc learn(LearnRequest) -> LearnResponse;
    rpc describe_state(DescribeStateRequest) -> DescribeStateResponse;
    rpc fetch_snapshot(FetchSnapshotRequest) -> FetchSnapshotResponse;
    rpc fetch_log_range(FetchLogRangeRequest) -> FetchLogRangeResponse;
}

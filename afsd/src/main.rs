//! Mount Harness: parses flags, builds the filesystem, and hands it to the kernel.

use std::sync::Arc;

use log::info;

use afsd::cache_store::CacheStore;
use afsd::config::Config;
use afsd::dispatcher::OperationDispatcher;
use afsd::fs::ClientFilesystem;
use afsd::node_table::NodeTable;
use afsd::rpc::grpc::GrpcFileService;

fn main() {
    env_logger::init();
    let config = Config::parse_compat();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let service = runtime
        .block_on(GrpcFileService::connect(config.server_uri()))
        .expect("failed to connect to server");

    let dispatcher = OperationDispatcher::new(
        NodeTable::new(),
        CacheStore::new(config.cache_dir.clone()),
        Arc::new(service),
        config.crash,
    );
    let filesystem = ClientFilesystem::new(dispatcher, runtime.handle().clone());

    info!("mounting afsd at {:?}", config.mountpoint);
    fuser::mount2(filesystem, &config.mountpoint, &config.mount_options())
        .expect("failed to mount filesystem");
}

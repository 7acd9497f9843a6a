mod feeder;
mod fetcher;

pub(crate) use feeder::{Delivery, Finish, SinkFeeder};
pub(crate) use fetcher::{ChunkFetcher, FetchOutcome};

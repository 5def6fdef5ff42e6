use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    loopback, ChannelClient, ChannelServer, ClientChannel, DelayedChannel, ErrorStack, Frame,
    IpcClient, IpcError, IpcServer, MessagePassingProtocol, NextTickChannel, Payload, RemoteError,
    Request, Response, StaticRouter,
};

mod support;
use support::*;

mod adapters_suite;
mod cancel;

//! Transport — concrete endpoint adapters: an axum listener for the server
//! side and a tonic channel for the client side.

pub mod client;
pub mod server;

pub use client::{RpcClient, RpcClientFactory};
pub use server::{HttpServer, HttpServerFactory, RouterBuilder, RouterHook, ServerBinding};

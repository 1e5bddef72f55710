use futures::stream::FuturesUnordered;

use crate::service::Provisioner;

pub mod web;

pub fn run(
    web: web::Config,
    service: Provisioner,
) -> FuturesUnordered<tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>>
{
    let futures = FuturesUnordered::new();

    futures.push(tokio::spawn(web::start(web, service)));

    futures
}

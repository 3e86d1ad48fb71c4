mod common;

use common::{Canned, MockProvider};
use http_rmi_client::{
    argument::StreamArgument,
    config::Config,
    dispatcher::{Outcome, RmiClient},
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

const CLASS: &str = "comp.prj.Class";

fn client(provider: &Arc<MockProvider>) -> RmiClient {
    RmiClient::with_provider("http://localhost/test", provider.clone(), Config::default()).unwrap()
}

#[tokio::test]
async fn value_without_callback_is_awaited() {
    let provider = Arc::new(MockProvider::new([Canned::json(200, "\"John Doe\"")]));
    let outcome = client(&provider)
        .call(CLASS, "name")
        .unwrap()
        .dispatch::<String>(None)
        .await
        .unwrap();
    assert_eq!(outcome.into_value().as_deref(), Some("John Doe"));
}

#[tokio::test]
async fn callback_runs_in_background() {
    let provider = Arc::new(MockProvider::new([Canned::json(200, "54")]));
    let (tx, rx) = oneshot::channel();
    let outcome = client(&provider)
        .call(CLASS, "age")
        .unwrap()
        .invoke_with(move |age: u32| {
            let _ = tx.send(age);
        })
        .await
        .unwrap();

    let Outcome::Spawned(handle) = outcome else {
        panic!("expected background execution");
    };
    handle.await.unwrap();
    assert_eq!(rx.await.unwrap(), 54);
}

#[tokio::test]
async fn void_without_callback_runs_in_background() {
    let provider = Arc::new(MockProvider::new([Canned::new(204)]));
    let outcome = client(&provider)
        .call(CLASS, "touch")
        .unwrap()
        .dispatch::<()>(None)
        .await
        .unwrap();

    let Outcome::Spawned(handle) = outcome else {
        panic!("expected background execution");
    };
    handle.await.unwrap();
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn background_failure_reaches_client_handler() {
    let provider = Arc::new(MockProvider::new([Canned::new(404)]));
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let client = client(&provider).on_failure(move |err| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(err.to_string());
        }
    });

    let outcome = client.call(CLASS, "touch").unwrap().dispatch::<()>(None).await.unwrap();
    let Outcome::Spawned(handle) = outcome else {
        panic!("expected background execution");
    };
    handle.await.unwrap();
    assert!(rx.await.unwrap().ends_with("method not found"));
}

#[tokio::test]
async fn invocation_handler_replaces_client_handler() {
    let provider = Arc::new(MockProvider::new([Canned::new(503)]));
    let client_failures = Arc::new(Mutex::new(Vec::new()));
    let call_failures = Arc::new(Mutex::new(Vec::new()));

    let recorded = client_failures.clone();
    let client = client(&provider).on_failure(move |err| recorded.lock().unwrap().push(err.to_string()));
    let recorded = call_failures.clone();
    let outcome = client
        .call(CLASS, "touch")
        .unwrap()
        .on_failure(move |err| recorded.lock().unwrap().push(err.to_string()))
        .dispatch::<()>(None)
        .await
        .unwrap();
    if let Outcome::Spawned(handle) = outcome {
        handle.await.unwrap();
    }

    assert!(client_failures.lock().unwrap().is_empty());
    assert_eq!(call_failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn background_failure_without_handler_is_swallowed() {
    let provider = Arc::new(MockProvider::new([Canned::new(500)]));
    let outcome = client(&provider)
        .call(CLASS, "touch")
        .unwrap()
        .dispatch::<()>(None)
        .await
        .unwrap();
    let Outcome::Spawned(handle) = outcome else {
        panic!("expected background execution");
    };
    assert!(handle.await.is_ok());
}

#[tokio::test]
async fn stream_argument_forces_awaited_execution() {
    let provider = Arc::new(MockProvider::new([Canned::json(200, "6")]));
    let delivered = Arc::new(Mutex::new(None));
    let sink = delivered.clone();

    let outcome = client(&provider)
        .call(CLASS, "upload")
        .unwrap()
        .arg(StreamArgument::from_bytes("stream"))
        .invoke_with(move |size: u64| {
            *sink.lock().unwrap() = Some(size);
        })
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Delivered));
    assert_eq!(*delivered.lock().unwrap(), Some(6));
}

#[tokio::test]
async fn stream_argument_failure_reaches_caller() {
    let provider = Arc::new(MockProvider::new([Canned::new(403)]));
    let result = client(&provider)
        .call(CLASS, "upload")
        .unwrap()
        .arg(StreamArgument::from_bytes("stream"))
        .invoke_with(|_: ()| {})
        .await;
    assert!(result.is_err());
}

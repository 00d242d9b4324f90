use super::*;
use crate::{Classifier, Dispatcher, Handler};
use kubert::index::IndexNamespacedResource;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

/// Forwards each notification's identity and event to the test.
struct Recorder(mpsc::UnboundedSender<(String, &'static str)>);

#[async_trait::async_trait]
impl Handler for Recorder {
    async fn handle(&self, notification: Notification) -> Result<(), Error> {
        let _ = self
            .0
            .send((notification.id().to_string(), notification.event()));
        Ok(())
    }
}

fn recording(workers: usize) -> (Dispatcher, mpsc::UnboundedReceiver<(String, &'static str)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Dispatcher::spawn(workers, Arc::new(Recorder(tx))), rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(String, &'static str)>) -> (String, &'static str) {
    tokio::time::timeout(tokio::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("notification must be handled")
        .expect("workers must be running")
}

#[tokio::test]
async fn notifications_for_an_object_are_ordered() {
    let (dispatcher, mut rx) = recording(4);

    let names = ["web", "api", "db"];
    for name in names {
        let svc = mk_service(name, "10.0.0.5", &[("http", 80)], &[]);
        dispatcher.dispatch(Notification::Service(Event::Add(svc.clone())));
        dispatcher.dispatch(Notification::Service(Event::Update(svc)));
        dispatcher.dispatch(Notification::Endpoints(Event::Delete(id(name))));
    }

    let mut seen = Vec::new();
    for _ in 0..9 {
        seen.push(next(&mut rx).await);
    }
    for name in names {
        let events = seen
            .iter()
            .filter(|(id, _)| *id == format!("ns-0/{name}"))
            .map(|(_, event)| *event)
            .collect::<Vec<_>>();
        assert_eq!(events, vec!["add", "update", "delete"], "{name}");
    }
}

#[tokio::test]
async fn classifier_distinguishes_additions() {
    let (dispatcher, mut rx) = recording(1);
    let classifier = Classifier::shared(dispatcher);

    let svc = mk_service("web", "10.0.0.5", &[("http", 80)], &[]);
    IndexNamespacedResource::<Service>::apply(&mut *classifier.write(), svc.clone());
    IndexNamespacedResource::<Service>::apply(&mut *classifier.write(), svc);
    IndexNamespacedResource::<Service>::delete(
        &mut *classifier.write(),
        "ns-0".to_string(),
        "web".to_string(),
    );
    // Deleting an object that was never announced is ignored.
    IndexNamespacedResource::<Service>::delete(
        &mut *classifier.write(),
        "ns-0".to_string(),
        "web".to_string(),
    );
    let ep = mk_endpoints("web", &[("a", "10.1.0.1")], &[("http", 8080)]);
    IndexNamespacedResource::<Endpoints>::apply(&mut *classifier.write(), ep);

    assert_eq!(next(&mut rx).await, ("ns-0/web".to_string(), "add"));
    assert_eq!(next(&mut rx).await, ("ns-0/web".to_string(), "update"));
    assert_eq!(next(&mut rx).await, ("ns-0/web".to_string(), "delete"));
    assert_eq!(next(&mut rx).await, ("ns-0/web".to_string(), "add"));
}

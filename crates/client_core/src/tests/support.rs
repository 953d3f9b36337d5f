use std::{
    collections::VecDeque,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use url::Url;

use crate::transport::{Transport, TransportError, TransportEvent, TransportLink};

/// Server side of one accepted mock transport.
pub(crate) struct MockRemote {
    pub(crate) inbound: mpsc::UnboundedSender<TransportEvent>,
    pub(crate) outbound: mpsc::UnboundedReceiver<String>,
}

/// Accepts or refuses opens following `plan`; refuses once the plan runs out.
pub(crate) struct MockTransport {
    plan: StdMutex<VecDeque<bool>>,
    pub(crate) opens: StdMutex<Vec<(Instant, Url)>>,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockTransport {
    pub(crate) fn new(plan: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            plan: StdMutex::new(plan.iter().copied().collect()),
            opens: StdMutex::new(Vec::new()),
            remotes,
        });
        (transport, remote_rx)
    }

    pub(crate) fn open_times(&self) -> Vec<Instant> {
        self.opens
            .lock()
            .expect("opens lock")
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub(crate) fn gaps(&self) -> Vec<Duration> {
        self.open_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        self.opens
            .lock()
            .expect("opens lock")
            .push((Instant::now(), endpoint.clone()));
        let accept = self
            .plan
            .lock()
            .expect("plan lock")
            .pop_front()
            .unwrap_or(false);
        if !accept {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "refused".to_string(),
            });
        }

        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (inbound, event_rx) = mpsc::unbounded_channel();
        let _ = self.remotes.send(MockRemote { inbound, outbound });
        Ok(TransportLink::new(outbound_tx, event_rx))
    }
}

//! Integration tests against the public API: the scenarios and invariants
//! a gateway core built on this crate must satisfy.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use knx_gateway_core::channel::handler::{DataEndpointHandler, SendMode};
use knx_gateway_core::channel::{Channel, ChannelRole};
use knx_gateway_core::config::{GatewayConfig, UserCredential};
use knx_gateway_core::crypto::{
    apply_keystream, counter_block, verify_packet_mac, KeyExchange, SessionKeys, X25519KeyExchange,
    ZeroSerialNumber,
};
use knx_gateway_core::frame::{
    AckBody, AckStatus, CemiFrame, FeatureId, FeatureService, HostProtocol, Hpai, KnxIpHeader,
    MessageCode, RequestBody, ServiceType,
};
use knx_gateway_core::session::handshake::SessionResBody;
use knx_gateway_core::session::wrapper::SecureWrapper;
use knx_gateway_core::{
    BusFrameSink, ChannelError, CloseReason, ControlEndpointCallbacks, IndividualAddress,
    OutboundDatagramSink, SecureSessionStore, SubnetStatus,
};

struct NoopControl {
    closed: Mutex<Vec<(u8, CloseReason)>>,
}

impl NoopControl {
    fn new() -> Self {
        Self {
            closed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ControlEndpointCallbacks for NoopControl {
    async fn on_channel_closed(&self, channel_id: u8, reason: CloseReason) {
        self.closed.lock().unwrap().push((channel_id, reason));
    }

    async fn subnet_status(&self, _channel_id: u8) -> SubnetStatus {
        SubnetStatus::Ok
    }

    async fn rebind_and_redispatch(
        &self,
        _channel_id: u8,
        _new_local_port: u16,
        _header: KnxIpHeader,
        _payload: Vec<u8>,
    ) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// A control endpoint stand-in that owns a second channel's handler and
/// actually performs the "rebind, then re-dispatch" half of the port-mismatch
/// recovery rule in §4.1, rather than discarding the packet.
struct RedispatchingControl {
    other: Mutex<Option<Arc<DataEndpointHandler>>>,
    rebound_port: Mutex<Option<u16>>,
}

impl RedispatchingControl {
    fn new() -> Self {
        Self {
            other: Mutex::new(None),
            rebound_port: Mutex::new(None),
        }
    }

    fn set_other(&self, handler: Arc<DataEndpointHandler>) {
        *self.other.lock().unwrap() = Some(handler);
    }
}

#[async_trait]
impl ControlEndpointCallbacks for RedispatchingControl {
    async fn on_channel_closed(&self, _channel_id: u8, _reason: CloseReason) {}

    async fn subnet_status(&self, _channel_id: u8) -> SubnetStatus {
        SubnetStatus::Ok
    }

    async fn rebind_and_redispatch(
        &self,
        _channel_id: u8,
        new_local_port: u16,
        header: KnxIpHeader,
        payload: Vec<u8>,
    ) -> Result<(), ChannelError> {
        *self.rebound_port.lock().unwrap() = Some(new_local_port);
        let handler = self.other.lock().unwrap().clone().expect("other handler registered");
        handler.accept_data_service(header, &payload).await?;
        Ok(())
    }
}

struct CollectingBus {
    frames: Mutex<Vec<(u8, CemiFrame)>>,
    resets: Mutex<Vec<u8>>,
}

impl CollectingBus {
    fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BusFrameSink for CollectingBus {
    async fn accept_from_channel(&self, channel_id: u8, cemi: CemiFrame) {
        self.frames.lock().unwrap().push((channel_id, cemi));
    }

    async fn on_reset(&self, channel_id: u8) {
        self.resets.lock().unwrap().push(channel_id);
    }
}

struct CollectingSink {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl CollectingSink {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OutboundDatagramSink for CollectingSink {
    async fn send_datagram(&self, dst: SocketAddr, bytes: Vec<u8>) {
        self.sent.lock().unwrap().push((dst, bytes));
    }
}

fn test_config() -> GatewayConfig {
    let mut users = HashMap::new();
    users.insert(
        1,
        UserCredential {
            user_id: 1,
            password_hash: [0u8; 16],
        },
    );
    GatewayConfig {
        device_authentication_key: [0u8; 16],
        users,
        session_timeout: Duration::from_secs(120),
    }
}

fn test_store() -> SecureSessionStore {
    SecureSessionStore::new(Arc::new(test_config()), Arc::new(ZeroSerialNumber))
}

fn l_data_frame(code: MessageCode, source: IndividualAddress) -> CemiFrame {
    let source_bytes = source.to_be_bytes();
    let data = vec![0x00, 0xBC, source_bytes[0], source_bytes[1], 0x11, 0x05, 0x01, 0x00];
    CemiFrame::new(code, data)
}

fn test_setup(
    role: ChannelRole,
) -> (
    Arc<DataEndpointHandler>,
    Arc<CollectingBus>,
    Arc<CollectingSink>,
    Arc<NoopControl>,
) {
    let channel = Arc::new(Channel::new(
        7,
        role,
        IndividualAddress(0x1203),
        "127.0.0.1:3671".parse().unwrap(),
        "127.0.0.1:50000".parse().unwrap(),
        50000,
        0,
    ));
    let control = Arc::new(NoopControl::new());
    let bus = Arc::new(CollectingBus::new());
    let sink = Arc::new(CollectingSink::new());
    let store = Arc::new(test_store());
    let handler = Arc::new(DataEndpointHandler::new(
        channel,
        control.clone(),
        bus.clone(),
        sink.clone(),
        store,
    ));
    (handler, bus, sink, control)
}

/// S1: tunneling happy path. Channel 7, seq_recv = 0. An inbound
/// TUNNELING_REQ with an L_Data.req from the unassigned source gets rewritten
/// to the channel's assigned address, acked NO_ERROR, and dispatched once.
#[tokio::test]
async fn tunneling_happy_path_rewrites_source_and_dispatches() {
    let (handler, bus, sink, _control) = test_setup(ChannelRole::TunnelingLinklayer);
    let body = RequestBody {
        channel_id: 7,
        seq: 0,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress::UNASSIGNED),
    };
    let bytes = body.to_bytes();
    let header = KnxIpHeader::new(ServiceType::TunnelingReq, 6 + bytes.len() as u16);

    let handled = handler.accept_data_service(header, &bytes).await.unwrap();
    assert!(handled);

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let ack = AckBody::parse(&sent[0].1[6..]).unwrap();
    assert_eq!(ack.channel_id, 7);
    assert_eq!(ack.seq, 0);
    assert!(ack.status.is_ok());

    let frames = bus.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1.source_address(), Some(IndividualAddress(0x1203)));
}

/// S2: a duplicate request (same seq replayed) produces exactly one more ack
/// and zero additional dispatches, while a genuinely new request right after
/// it proves `seq_recv` did advance past the original request.
#[tokio::test]
async fn duplicate_request_acks_but_does_not_redispatch() {
    let (handler, bus, sink, _control) = test_setup(ChannelRole::TunnelingLinklayer);
    let first = RequestBody {
        channel_id: 7,
        seq: 0,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress(0x1102)),
    };
    let first_bytes = first.to_bytes();
    let header = KnxIpHeader::new(ServiceType::TunnelingReq, 6 + first_bytes.len() as u16);

    handler.accept_data_service(header, &first_bytes).await.unwrap();
    handler.accept_data_service(header, &first_bytes).await.unwrap();

    assert_eq!(bus.frames.lock().unwrap().len(), 1, "duplicate must not redispatch");
    assert_eq!(sink.sent.lock().unwrap().len(), 2, "duplicate must still be acked");

    let next = RequestBody {
        channel_id: 7,
        seq: 1,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress(0x1102)),
    };
    let next_bytes = next.to_bytes();
    let next_header = KnxIpHeader::new(ServiceType::TunnelingReq, 6 + next_bytes.len() as u16);
    handler.accept_data_service(next_header, &next_bytes).await.unwrap();
    assert_eq!(bus.frames.lock().unwrap().len(), 2, "a genuinely new seq must dispatch");
}

/// S3: a version mismatch acks VERSION_NOT_SUPPORTED, closes the channel
/// exactly once, and a second explicit close call does not double the
/// control-endpoint notification.
#[tokio::test]
async fn version_mismatch_closes_channel_once() {
    let (handler, _bus, sink, control) = test_setup(ChannelRole::TunnelingLinklayer);
    let body = RequestBody {
        channel_id: 7,
        seq: 0,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress(0x1102)),
    };
    let bytes = body.to_bytes();
    let mut header = KnxIpHeader::new(ServiceType::TunnelingReq, 6 + bytes.len() as u16);
    header.version = 0x11;

    let result = handler.accept_data_service(header, &bytes).await;
    assert!(matches!(result, Err(ChannelError::VersionMismatch(0x11))));

    let sent = sink.sent.lock().unwrap();
    let ack = AckBody::parse(&sent[0].1[6..]).unwrap();
    assert!(!ack.status.is_ok());
    assert_eq!(control.closed.lock().unwrap().len(), 1);
    assert!(handler.is_closed());

    handler.close(CloseReason::ProtocolVersionMismatch).await;
    assert_eq!(control.closed.lock().unwrap().len(), 1, "close must be idempotent");
}

/// S4: a TUNNELING_FEATURE_GET for IndividualAddress on a channel assigned
/// 1.2.3 returns Success with value 0x12 0x03.
#[tokio::test]
async fn feature_get_returns_assigned_address() {
    let (handler, _bus, sink, _control) = test_setup(ChannelRole::TunnelingLinklayer);
    let req = FeatureService {
        channel_id: 7,
        seq: 0,
        feature_id: FeatureId::IndividualAddress,
        value: Vec::new(),
    };
    let bytes = req.to_bytes();
    let header = KnxIpHeader::new(ServiceType::TunnelingFeatureGet, 6 + bytes.len() as u16);

    handler.accept_data_service(header, &bytes).await.unwrap();

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let raw = &sent[0].1[6..];
    assert_eq!(raw[3], FeatureId::IndividualAddress.to_byte());
    assert_eq!(raw[4], 0x00, "result byte must be Success");
    assert_eq!(&raw[5..7], &[0x12, 0x03]);
}

/// Invariant 4: a busmonitor channel never dispatches inbound cEMI upward,
/// no matter what message code arrives.
#[tokio::test]
async fn busmonitor_channel_never_dispatches_upward() {
    let (handler, bus, _sink, _control) = test_setup(ChannelRole::TunnelingBusmonitor);
    let body = RequestBody {
        channel_id: 7,
        seq: 0,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress(0x1102)),
    };
    let bytes = body.to_bytes();
    let header = KnxIpHeader::new(ServiceType::TunnelingReq, 6 + bytes.len() as u16);
    handler.accept_data_service(header, &bytes).await.unwrap();
    assert!(bus.frames.lock().unwrap().is_empty());
}

/// Device-management channels only dispatch PropRead.req/PropWrite.req/Reset.req.
#[tokio::test]
async fn device_management_channel_drops_unrecognized_cemi() {
    let (handler, bus, _sink, _control) = test_setup(ChannelRole::DeviceManagement);
    let body = RequestBody {
        channel_id: 7,
        seq: 0,
        cemi: l_data_frame(MessageCode::LDataReq, IndividualAddress(0x1102)),
    };
    let bytes = body.to_bytes();
    let header = KnxIpHeader::new(ServiceType::DeviceConfigurationReq, 6 + bytes.len() as u16);
    handler.accept_data_service(header, &bytes).await.unwrap();
    assert!(bus.frames.lock().unwrap().is_empty());

    let reset = RequestBody {
        channel_id: 7,
        seq: 1,
        cemi: CemiFrame::new(MessageCode::ResetReq, Vec::new()),
    };
    let reset_bytes = reset.to_bytes();
    let reset_header = KnxIpHeader::new(ServiceType::DeviceConfigurationReq, 6 + reset_bytes.len() as u16);
    handler.accept_data_service(reset_header, &reset_bytes).await.unwrap();
    assert_eq!(bus.frames.lock().unwrap().len(), 1);
    assert_eq!(bus.resets.lock().unwrap().as_slice(), &[7], "Reset.req must also fire the reset callback");
}

/// CONNECTIONSTATE_REQ compatibility quirk: answered on the control
/// endpoint, not the data endpoint it arrived on.
#[tokio::test]
async fn connection_state_req_replies_on_control_endpoint() {
    let (handler, _bus, sink, _control) = test_setup(ChannelRole::TunnelingLinklayer);
    let hpai = Hpai {
        host_protocol: HostProtocol::Ipv4Udp,
        endpoint: SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 3671),
    };
    let mut body = vec![7u8, 0u8];
    body.extend_from_slice(&hpai.to_bytes());
    let header = KnxIpHeader::new(ServiceType::ConnectionStateReq, 6 + body.len() as u16);

    handler.accept_data_service(header, &body).await.unwrap();

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "127.0.0.1:3671".parse::<SocketAddr>().unwrap());
    let reply_header = KnxIpHeader::parse(&sent[0].1).unwrap();
    assert_eq!(reply_header.service_type, ServiceType::ConnectionStateRes);
    assert_eq!(sent[0].1[6], 7);
    assert_eq!(sent[0].1[7], 0x00);
}

/// Blocking send suspends until the matching ack arrives, then resolves.
#[tokio::test]
async fn blocking_send_resolves_once_ack_arrives() {
    let (handler, _bus, sink, _control) = test_setup(ChannelRole::TunnelingLinklayer);
    let cemi = l_data_frame(MessageCode::LDataInd, IndividualAddress(0x1203));

    let sender = handler.clone();
    let send_task = tokio::spawn(async move { sender.send(cemi, SendMode::Blocking).await });

    // give the sender a chance to register the pending ack before we reply.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ack = AckBody {
        channel_id: 7,
        seq: 0,
        status: AckStatus::NoError,
    };
    let ack_bytes = ack.to_bytes();
    let ack_header = KnxIpHeader::new(ServiceType::TunnelingAck, 6 + ack_bytes.len() as u16);
    handler.accept_data_service(ack_header, &ack_bytes).await.unwrap();

    let result = send_task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(sink.sent.lock().unwrap().len(), 1);
}

/// Invariant 7: wrapping recovers the original packet byte for byte and
/// stamps each packet with the pre-increment send_seq value, so consecutive
/// wraps carry strictly increasing sequence numbers.
#[tokio::test]
async fn wrap_round_trips_and_uses_pre_increment_seq() {
    let store = test_store();
    let client = X25519KeyExchange::new();
    let src: SocketAddr = "127.0.0.1:45000".parse().unwrap();
    let local_addr: SocketAddr = "127.0.0.1:3671".parse().unwrap();
    let sink = CollectingSink::new();

    let header = KnxIpHeader::new(ServiceType::SessionReq, 38);
    store
        .accept(header, &client.public_key(), src, local_addr, &sink)
        .await
        .unwrap();
    let (_, req_bytes) = sink.sent.lock().unwrap()[0].clone();
    let res = SessionResBody::parse(&req_bytes[6..]).unwrap();
    let shared = client.shared_secret(&res.server_public_key);
    let session_keys = SessionKeys::derive(&shared);

    let inner = b"arbitrary inner knxnet/ip packet".to_vec();
    let wrapped_once = store.wrap(res.session_id, &inner).unwrap();
    let wrapped_twice = store.wrap(res.session_id, &inner).unwrap();

    let wrapper_one = SecureWrapper::parse(&wrapped_once[6..]).unwrap();
    let wrapper_two = SecureWrapper::parse(&wrapped_twice[6..]).unwrap();
    assert_eq!(wrapper_one.seq, 0);
    assert_eq!(wrapper_two.seq, 1);

    let counter = counter_block(
        wrapper_one.session_id,
        wrapper_one.seq,
        wrapper_one.serial_number,
        wrapper_one.msg_tag,
    );
    assert!(verify_packet_mac(
        &session_keys.key,
        counter,
        &wrapper_one.ciphertext,
        &wrapper_one.mac
    ));
    let mut decrypted = wrapper_one.ciphertext.clone();
    apply_keystream(&session_keys.key, counter, &mut decrypted);
    assert_eq!(decrypted, inner);
}

/// S6: a session with last_update = now - 121s is swept, a SESSION_STATUS
/// (Timeout) packet is emitted to the recorded client endpoint, and the
/// session is removed.
#[tokio::test]
async fn sweep_notifies_and_removes_dormant_session() {
    let store = test_store();
    let client = X25519KeyExchange::new();
    let src: SocketAddr = "127.0.0.1:45001".parse().unwrap();
    let local_addr: SocketAddr = "127.0.0.1:3671".parse().unwrap();
    let sink = CollectingSink::new();

    let header = KnxIpHeader::new(ServiceType::SessionReq, 38);
    store
        .accept(header, &client.public_key(), src, local_addr, &sink)
        .await
        .unwrap();
    let (_, req_bytes) = sink.sent.lock().unwrap()[0].clone();
    let res = SessionResBody::parse(&req_bytes[6..]).unwrap();
    assert!(store.is_session_alive(res.session_id));
    let shared = client.shared_secret(&res.server_public_key);
    let session_keys = SessionKeys::derive(&shared);

    let far_future = Instant::now() + Duration::from_secs(121);
    store.sweep(far_future, &sink).await;

    assert!(store.session(res.session_id).is_none());
    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 2, "one SESSION_RES plus one wrapped SESSION_STATUS(Timeout)");
    assert_eq!(sent[1].0, src);

    // the timeout notification travels wrapped inside a SECURE_SVC envelope,
    // same as every other post-handshake packet.
    let outer_header = KnxIpHeader::parse(&sent[1].1).unwrap();
    assert_eq!(outer_header.service_type, ServiceType::SecureSvc);
    let wrapper = SecureWrapper::parse(&sent[1].1[6..]).unwrap();
    let counter = counter_block(wrapper.session_id, wrapper.seq, wrapper.serial_number, wrapper.msg_tag);
    assert!(verify_packet_mac(&session_keys.key, counter, &wrapper.ciphertext, &wrapper.mac));
    let mut inner = wrapper.ciphertext.clone();
    apply_keystream(&session_keys.key, counter, &mut inner);
    let inner_header = KnxIpHeader::parse(&inner).unwrap();
    assert_eq!(inner_header.service_type, ServiceType::SessionStatus);
    assert_eq!(inner[6], 3, "status byte must be Timeout (3)");
}

/// Port-mismatch recovery (§4.1): a device-configuration packet addressed to
/// channel 9 that arrives on channel 7's data endpoint gets rebound and
/// re-dispatched to channel 9's own handler, rather than dropped, and
/// `accept_data_service` still reports the packet as handled.
#[tokio::test]
async fn device_config_port_mismatch_rebinds_and_redispatches() {
    let control = Arc::new(RedispatchingControl::new());
    let store = Arc::new(test_store());

    let wrong_channel = Arc::new(Channel::new(
        7,
        ChannelRole::TunnelingLinklayer,
        IndividualAddress(0x1203),
        "127.0.0.1:3671".parse().unwrap(),
        "127.0.0.1:50000".parse().unwrap(),
        50000,
        0,
    ));
    let wrong_bus = Arc::new(CollectingBus::new());
    let wrong_sink = Arc::new(CollectingSink::new());
    let wrong_handler = Arc::new(DataEndpointHandler::new(
        wrong_channel,
        control.clone(),
        wrong_bus.clone(),
        wrong_sink.clone(),
        store.clone(),
    ));

    let owning_channel = Arc::new(Channel::new(
        9,
        ChannelRole::DeviceManagement,
        IndividualAddress(0x1204),
        "127.0.0.1:3671".parse().unwrap(),
        "127.0.0.1:51000".parse().unwrap(),
        51000,
        0,
    ));
    let owning_bus = Arc::new(CollectingBus::new());
    let owning_sink = Arc::new(CollectingSink::new());
    let owning_handler = Arc::new(DataEndpointHandler::new(
        owning_channel,
        control.clone(),
        owning_bus.clone(),
        owning_sink.clone(),
        store,
    ));
    control.set_other(owning_handler);

    let body = RequestBody {
        channel_id: 9,
        seq: 0,
        cemi: CemiFrame::new(MessageCode::PropReadReq, vec![0x00]),
    };
    let bytes = body.to_bytes();
    let header = KnxIpHeader::new(ServiceType::DeviceConfigurationReq, 6 + bytes.len() as u16);

    let handled = wrong_handler.accept_data_service(header, &bytes).await.unwrap();
    assert!(handled);

    assert!(wrong_bus.frames.lock().unwrap().is_empty(), "wrong channel must not dispatch");
    assert_eq!(owning_bus.frames.lock().unwrap().len(), 1, "owning channel must dispatch");
    assert_eq!(*control.rebound_port.lock().unwrap(), Some(50000));
    assert_eq!(owning_sink.sent.lock().unwrap().len(), 1, "owning channel must ack on its own behalf");
}

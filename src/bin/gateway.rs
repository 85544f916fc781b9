use kafka_gateway::{
    binding::{KafkaBinding, KafkaRoute},
    client::KafkaClientFactory,
    config::GatewayConfig,
    engine::{Context, Engine, MessageConsumer},
    network::tcp::TcpDriver,
    stream::{
        self,
        ext::{Capabilities, KafkaBeginEx, MergedBeginEx, MergedDataEx},
        Begin, BeginEx, DataEx, Frame, Window,
    },
};

const BINDING_ID: u64 = 1;
const NETWORK_ID: u64 = 2;
const REPLY_WINDOW: i32 = 64 * 1024;

/// Logs every record of the merged stream and keeps its window open.
struct Tail;

impl MessageConsumer for Tail {
    fn on_message(&mut self, cx: &mut Context, frame: Frame) {
        match frame {
            Frame::Begin(begin) if !stream::is_initial(begin.stream_id) => {
                tracing::info!("Following topic, {:?}", begin.extension);
                cx.send(Frame::Window(Window {
                    origin_id: begin.origin_id,
                    routed_id: begin.routed_id,
                    stream_id: begin.stream_id,
                    maximum: REPLY_WINDOW,
                    ..Default::default()
                }));
            }
            Frame::Data(data) => {
                if let Some(DataEx::Merged(MergedDataEx::Fetch(ext))) = &data.extension {
                    tracing::info!(
                        "partition {} offset {} key {:?} value {:?}",
                        ext.partition.partition_id,
                        ext.partition.partition_offset,
                        ext.key,
                        data.payload
                    );
                }
                let sequence = data.sequence + data.reserved as i64;
                cx.send(Frame::Window(Window {
                    origin_id: data.origin_id,
                    routed_id: data.routed_id,
                    stream_id: data.stream_id,
                    sequence,
                    acknowledge: sequence,
                    maximum: REPLY_WINDOW,
                    ..Default::default()
                }));
            }
            Frame::Reset(reset) => tracing::error!("Stream reset {:?}", reset.extension),
            Frame::Abort(_) | Frame::End(_) => tracing::warn!("Stream closed"),
            _ => {}
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let bootstrap = args.next().unwrap_or_else(|| "127.0.0.1:9092".to_owned());
    let topic = args.next().unwrap_or_else(|| "purchases".to_owned());

    let config = GatewayConfig::default();
    let binding = KafkaBinding::new(BINDING_ID).route(KafkaRoute::new(NETWORK_ID));
    let mut engine = Engine::new(config.clone());
    engine.register(BINDING_ID, Box::new(KafkaClientFactory::new(binding, &config)));

    let mut driver = TcpDriver::new();
    engine.register(NETWORK_ID, Box::new(driver.factory(&bootstrap)));

    tracing::info!("Reading {} through {}", topic, bootstrap);
    let tail = engine.attach(Box::new(Tail));
    let stream_id = engine.context().supply_initial_id();
    engine.send(
        tail,
        Frame::Begin(Begin {
            routed_id: BINDING_ID,
            stream_id,
            extension: Some(BeginEx::Kafka(KafkaBeginEx::Merged(MergedBeginEx {
                capabilities: Capabilities::FetchOnly,
                topic,
                ..Default::default()
            }))),
            ..Default::default()
        }),
    );

    driver
        .run(&mut engine)
        .await
        .map_err(|err| tracing::error!("{:?}", err))
}

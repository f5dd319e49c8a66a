//! Line-oriented chat client.
//!
//! Configure with `TTHC_API_BASE_URL`, `TTHC_API_KEY` and friends, then type
//! questions on stdin. `/new` starts a new conversation, `/clear` forgets all
//! of them and `/quit` exits.

use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use tthc_chat::chat::ChatController;
use tthc_chat::http::ApiClient;
use tthc_chat::logging::init_tracing;
use tthc_chat::options::{ChatOptions, ClientConfig, StoreOptions};
use tthc_chat::procedures::ProcedureSummary;
use tthc_chat::store::ConversationStore;

#[tokio::main]
async fn main() -> ExitCode {
    let config = ClientConfig::from_env();
    init_tracing(&config.log_level);

    if let Err(e) = config.validate() {
        eprintln!("Cấu hình môi trường không hợp lệ: {}", e);
        return ExitCode::FAILURE;
    }

    let transport = match ApiClient::new(config.transport.clone()) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = ConversationStore::new(StoreOptions::default()).into_shared();
    let options = ChatOptions::default().with_endpoints(config.endpoints.clone());
    let controller = ChatController::new(transport, store, options);

    if controller.check_health().await.is_err() {
        eprintln!("Không thể kết nối đến server. Vui lòng kiểm tra lại.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };

        match line.trim() {
            "/quit" => break,
            "/new" => {
                controller.start_new_conversation();
                continue;
            }
            "/clear" => {
                controller.clear_all();
                continue;
            }
            _ => {}
        }

        let outcome = match controller.send_turn(&line).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => continue,
            Err(_) => {
                if let Some(message) = controller.last_error() {
                    eprintln!("Lỗi kết nối: {}", message);
                    controller.dismiss_error();
                }
                continue;
            }
        };

        if let Some(stream) = outcome.stream {
            stream.wait().await;
        }

        let store = controller.store().lock();
        let Some(reply) = store
            .get(&outcome.conversation_id)
            .and_then(|c| c.message(&outcome.assistant_message_id))
        else {
            continue;
        };

        println!("{}", reply.text);
        for procedure in ProcedureSummary::list_from(reply.data.as_ref()) {
            println!("  - [{}] {} ({})", procedure.code, procedure.title, procedure.department);
        }
    }

    controller.shutdown();
    ExitCode::SUCCESS
}

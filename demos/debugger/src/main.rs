use nestor_ws::{CpuCommand, PageLocation, Request, SessionConfig, SessionContext};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> nestor_ws::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Same session the UI would get when served from the emulator itself.
    let context = SessionContext::new(SessionConfig::from_env());
    let session = context.acquire(&PageLocation::default())?;
    let connection = session.connection().clone();

    let _state = connection.on_state(|state| {
        println!("cpu {:?} pc=${:04X}", state.status, state.pc);
    });
    let _ready = connection.on_connection_change(
        |open| println!("{}", if open { "connected" } else { "Connecting..." }),
        true,
    );

    println!("commands: run | pause | step | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = match line.trim() {
            "run" => CpuCommand::Run,
            "pause" => CpuCommand::Pause,
            "step" => CpuCommand::Step,
            "quit" | "exit" => break,
            "" => continue,
            other => {
                log::warn!("unknown command {:?}", other);
                continue;
            }
        };

        if !session.is_ready() {
            log::warn!("not connected, {:?} dropped", command);
        }
        connection.send(&Request::SetCpuState(command))?;
    }

    context.shutdown();
    Ok(())
}

mod app;
mod ui;

use anyhow::Result;
use app::{poll_event, App, AppAction};
use crossterm::event::Event;
use netspeed::logging::{init_logging, LoggingConfig};
use netspeed::{Engine, EngineEvent, Settings, TestKind};
use ratatui::DefaultTerminal;
use std::time::Duration;
use tokio::sync::mpsc;
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::from_env())?;
    let engine = Engine::new(Settings::from_env()?)?;

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, &engine).await;

    ratatui::restore();
    engine.shutdown();
    result
}

async fn run_app(terminal: &mut DefaultTerminal, engine: &Engine) -> Result<()> {
    let mut app = App::new();
    app.network = engine.network_type().await;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let _subscription = engine.events().add_any_listener(move |event| {
        let _ = event_tx.send(event.clone());
    });

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        while let Ok(event) = event_rx.try_recv() {
            app.handle_event(event);
        }

        if let Some(kind) = app.pop_queued() {
            start_test(engine, &mut app, kind);
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartQueued => {
                        if let Some(kind) = app.pop_queued() {
                            start_test(engine, &mut app, kind);
                        }
                    }
                    AppAction::CancelTest => {
                        engine.cancel_test();
                    }
                    AppAction::RefreshNetwork => {
                        app.network = engine.network_type().await;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn start_test(engine: &Engine, app: &mut App, kind: TestKind) {
    match engine.start(kind, app.options.config_for(kind)) {
        Ok(id) => app.begin_test(id, kind),
        Err(e) => app.start_failed(kind, e.to_string()),
    }
}

use std::env;
use std::path::{Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};

use confab_engine::{
    ChatEngine, ChunkOutcome, EngineError, EngineSettings, SettingsStore, StoreSnapshot,
};
use confab_model::{
    GenericItem, LocalItemId, Message, MessageHistory, MessageId, MessageKind, NewMessage,
    StreamChunk,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    replay_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    write_settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    NormalizeNested,
    StreamText,
    TerminalPrecedence,
    FinalIdempotent,
    RemoveGrid,
    LateChunk,
    OutOfOrderComplete,
    ClearSilent,
    Replay,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "normalize_nested" => Some(Self::NormalizeNested),
            "stream_text" => Some(Self::StreamText),
            "terminal_precedence" => Some(Self::TerminalPrecedence),
            "final_idempotent" => Some(Self::FinalIdempotent),
            "remove_grid" => Some(Self::RemoveGrid),
            "late_chunk" => Some(Self::LateChunk),
            "out_of_order_complete" => Some(Self::OutOfOrderComplete),
            "clear_silent" => Some(Self::ClearSilent),
            "replay" => Some(Self::Replay),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NormalizeNested => "normalize_nested",
            Self::StreamText => "stream_text",
            Self::TerminalPrecedence => "terminal_precedence",
            Self::FinalIdempotent => "final_idempotent",
            Self::RemoveGrid => "remove_grid",
            Self::LateChunk => "late_chunk",
            Self::OutOfOrderComplete => "out_of_order_complete",
            Self::ClearSilent => "clear_silent",
            Self::Replay => "replay",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("missing required --replay argument"))]
    MissingReplayPath { stage: &'static str },
    #[snafu(display("engine operation failed: {source}"))]
    Engine {
        stage: &'static str,
        source: EngineError,
    },
    #[snafu(display("replay line {line} rejected: {source}"))]
    ReplayLine {
        stage: &'static str,
        line: usize,
        source: EngineError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    let settings = load_settings(&args)?;
    if let Some(path) = args.write_settings_path.as_deref() {
        write_settings(path, &settings)?;
    }

    match args.scenario {
        Scenario::NormalizeNested => run_normalize_nested(&settings).await,
        Scenario::StreamText => run_stream_text(&settings).await,
        Scenario::TerminalPrecedence => run_terminal_precedence(&settings).await,
        Scenario::FinalIdempotent => run_final_idempotent(&settings).await,
        Scenario::RemoveGrid => run_remove_grid(&settings).await,
        Scenario::LateChunk => run_late_chunk(&settings).await,
        Scenario::OutOfOrderComplete => run_out_of_order_complete(&settings).await,
        Scenario::ClearSilent => run_clear_silent(&settings).await,
        Scenario::Replay => {
            let path = args.replay_path.as_ref().context(MissingReplayPathSnafu {
                stage: "require-replay-path",
            })?;
            run_replay(&settings, path).await
        }
        Scenario::All => run_all(&settings).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = Scenario::All;
    let mut replay_path = None;
    let mut settings_path = None;
    let mut write_settings_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                scenario = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
            }
            "--replay" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-replay-value",
                    arg: "--replay",
                })?;
                replay_path = Some(PathBuf::from(value));
            }
            "--settings" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-settings-value",
                    arg: "--settings",
                })?;
                settings_path = Some(PathBuf::from(value));
            }
            "--write-settings" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-write-settings-value",
                    arg: "--write-settings",
                })?;
                write_settings_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario,
        replay_path,
        settings_path,
        write_settings_path,
    })
}

/// Scenario output stays reproducible unless the settings file names its own prefix.
fn load_settings(args: &RunnerArgs) -> RunnerResult<EngineSettings> {
    let Some(path) = args.settings_path.as_deref() else {
        return Ok(EngineSettings::default().with_id_prefix("qa"));
    };

    let settings = SettingsStore::read_file(path).context(EngineSnafu {
        stage: "load-runner-settings",
    })?;
    println!("settings_path={}", path.display());
    if settings.id_prefix.is_some() {
        return Ok(settings);
    }
    Ok(settings.with_id_prefix("qa"))
}

/// Persists the effective settings so a run can be repeated with `--settings <path>`.
fn write_settings(path: &Path, settings: &EngineSettings) -> RunnerResult<()> {
    let store = SettingsStore::new(path.to_path_buf());
    let changed = store.update(settings.clone()).context(EngineSnafu {
        stage: "write-runner-settings",
    })?;
    let written = SettingsStore::read_file(path).context(EngineSnafu {
        stage: "reread-runner-settings",
    })?;
    ensure(
        "write_settings",
        written == *store.settings(),
        format!("{} does not hold the effective settings", path.display()),
    )?;

    println!("settings_written={}", path.display());
    println!("settings_file_changed={changed}");
    Ok(())
}

async fn run_all(settings: &EngineSettings) -> RunnerResult<()> {
    run_normalize_nested(settings).await?;
    run_stream_text(settings).await?;
    run_terminal_precedence(settings).await?;
    run_final_idempotent(settings).await?;
    run_remove_grid(settings).await?;
    run_late_chunk(settings).await?;
    run_out_of_order_complete(settings).await?;
    run_clear_silent(settings).await?;
    println!("all_passed=true");
    Ok(())
}

async fn run_normalize_nested(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let tree = GenericItem::card(
        vec![
            GenericItem::text("title"),
            GenericItem::carousel(vec![GenericItem::grid(vec![vec![
                vec![GenericItem::text("cell-a")],
                vec![GenericItem::text("cell-b")],
            ]])]),
        ],
        vec![GenericItem::text("footer")],
    );
    let id = engine
        .add_message(NewMessage::response(vec![tree.clone()]).with_id("nested"))
        .await;

    let snapshot = engine.snapshot().await;
    let rebuilt = snapshot.rebuild_message_items(&id);
    let item_count = snapshot.all_items_by_id().len();
    println!("normalize_nested_item_count={item_count}");

    ensure(
        "normalize_nested",
        rebuilt.as_deref() == Some(std::slice::from_ref(&tree)),
        "rebuilt tree differs from the added tree",
    )?;
    ensure(
        "normalize_nested",
        item_count == 7,
        format!("expected 7 local items, got {item_count}"),
    )?;
    ensure_invariants("normalize_nested", &snapshot)?;
    println!("normalize_nested=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_stream_text(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let mut expected = String::new();

    for part in ["Stre", "aming ", "is ", "exact"] {
        engine
            .add_message_chunk(StreamChunk::partial("stream", "1", GenericItem::text(part)))
            .await;
        expected.push_str(part);

        let rendered = rendered_text(&engine.snapshot().await, "stream", "1");
        ensure(
            "stream_text",
            rendered.as_deref() == Some(expected.as_str()),
            format!("expected {expected:?}, rendered {rendered:?}"),
        )?;
    }

    println!("stream_text_rendered={expected}");
    println!("stream_text=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_terminal_precedence(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    engine
        .add_message_chunk(StreamChunk::partial("terminal", "1", GenericItem::text("Hello ")))
        .await;
    engine
        .add_message_chunk(StreamChunk::partial("terminal", "1", GenericItem::text("wor")))
        .await;
    engine
        .add_message_chunk(StreamChunk::complete(
            "terminal",
            "1",
            GenericItem::text("Hello world!"),
        ))
        .await;

    let snapshot = engine.snapshot().await;
    let rendered = rendered_text(&snapshot, "terminal", "1");
    println!("terminal_precedence_rendered={}", rendered.as_deref().unwrap_or_default());
    ensure(
        "terminal_precedence",
        rendered.as_deref() == Some("Hello world!"),
        format!("complete chunk did not win: {rendered:?}"),
    )?;
    ensure(
        "terminal_precedence",
        snapshot.streaming_item_count() == 0,
        "item still streaming after complete chunk",
    )?;
    println!("terminal_precedence=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_final_idempotent(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    engine
        .add_message_chunk(StreamChunk::partial("final", "1", GenericItem::text("Draft")))
        .await;

    let final_message = Message::response(
        "final",
        vec![
            GenericItem::text("Final answer").with_streaming_id("1"),
            GenericItem::text("Sources: none").with_streaming_id("2"),
        ],
    );
    let first = engine
        .add_message_chunk(StreamChunk::final_response(final_message.clone()))
        .await;
    let after_first = engine.snapshot().await;
    let second = engine
        .add_message_chunk(StreamChunk::final_response(final_message))
        .await;
    let after_second = engine.snapshot().await;

    println!("final_idempotent_first={}", first.label());
    println!("final_idempotent_second={}", second.label());
    ensure(
        "final_idempotent",
        matches!(first, ChunkOutcome::Finalized { item_count: 2, .. }),
        format!("unexpected first outcome {first:?}"),
    )?;
    ensure("final_idempotent", second.is_ignored(), "second final chunk was applied")?;
    ensure(
        "final_idempotent",
        after_first == after_second,
        "second final chunk changed the store",
    )?;
    ensure(
        "final_idempotent",
        rendered_text(&after_second, "final", "1").as_deref() == Some("Final answer"),
        "final response did not replace the streamed item in place",
    )?;
    ensure_invariants("final_idempotent", &after_second)?;
    println!("final_idempotent=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_remove_grid(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let cells = (1..=3)
        .map(|column| vec![GenericItem::text(format!("r0c{column}"))])
        .collect::<Vec<_>>();
    let second_row = (1..=3)
        .map(|column| vec![GenericItem::text(format!("r1c{column}"))])
        .collect::<Vec<_>>();
    let id = engine
        .add_message(NewMessage::response(vec![GenericItem::grid(vec![cells, second_row])]))
        .await;

    let before = engine.snapshot().await.all_items_by_id().len();
    let removed = engine.remove_messages(&[id.clone(), MessageId::new("unknown")]).await;
    let after = engine.snapshot().await;

    let dropped = before - after.all_items_by_id().len();
    println!("remove_grid_items_removed={dropped}");
    ensure("remove_grid", dropped == 7, format!("expected 7 items removed, got {dropped}"))?;
    ensure("remove_grid", removed == [id], "removal reported unexpected ids")?;
    ensure("remove_grid", after.conversation_order().is_empty(), "stale conversation order")?;

    let untouched = after.clone();
    engine.remove_messages(&[MessageId::new("unknown")]).await;
    ensure(
        "remove_grid",
        engine.snapshot().await == untouched,
        "unknown id removal changed the store",
    )?;
    println!("remove_grid=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_late_chunk(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    engine
        .add_message_chunk(StreamChunk::complete("late", "1", GenericItem::text("done")))
        .await;
    engine
        .add_message_chunk(StreamChunk::final_response(Message::response(
            "late",
            vec![GenericItem::text("done").with_streaming_id("1")],
        )))
        .await;
    let finalized = engine.snapshot().await;

    let outcomes = [
        engine
            .add_message_chunk(StreamChunk::partial("late", "1", GenericItem::text(" more")))
            .await,
        engine
            .add_message_chunk(StreamChunk::complete("late", "2", GenericItem::text("extra")))
            .await,
    ];

    let ignored = outcomes.iter().filter(|outcome| outcome.is_ignored()).count();
    println!("late_chunk_ignored={ignored}");
    ensure("late_chunk", ignored == outcomes.len(), "late chunk was applied")?;
    ensure(
        "late_chunk",
        engine.snapshot().await == finalized,
        "late chunk mutated a finalized response",
    )?;
    println!("late_chunk=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_out_of_order_complete(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let chunks = futures::stream::iter(vec![
        StreamChunk::partial("ooo", "a", GenericItem::text("alpha")),
        StreamChunk::partial("ooo", "b", GenericItem::text("beta")),
        StreamChunk::partial("ooo", "c", GenericItem::text("gamma")),
        StreamChunk::complete("ooo", "c", GenericItem::text("gamma.")),
        StreamChunk::complete("ooo", "a", GenericItem::text("alpha.")),
        StreamChunk::complete("ooo", "b", GenericItem::text("beta.")),
    ]);
    engine.consume_chunks(chunks).await;

    let snapshot = engine.snapshot().await;
    let order = snapshot
        .items_for_message(&MessageId::new("ooo"))
        .iter()
        .map(LocalItemId::as_str)
        .collect::<Vec<_>>();
    println!("out_of_order_complete_order={}", order.join(","));
    ensure(
        "out_of_order_complete",
        order == ["ooo::a", "ooo::b", "ooo::c"],
        "completion order changed item order",
    )?;
    println!("out_of_order_complete=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_clear_silent(settings: &EngineSettings) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let silent = NewMessage::new(MessageKind::Request, vec![GenericItem::text("context")])
        .with_history(MessageHistory {
            silent: true,
            ..MessageHistory::default()
        });
    engine.add_message(silent).await;
    engine.add_message(NewMessage::request_text("visible")).await;
    engine.adjust_loading(2).await;
    engine.adjust_hydrating(1).await;

    let populated = engine.snapshot().await;
    let visible = populated.conversation_order().len();
    let stored = populated.message_order().len();
    println!("clear_silent_visible={visible}");
    println!("clear_silent_stored={stored}");
    ensure("clear_silent", visible == 1 && stored == 2, "silent message leaked into view")?;

    engine.clear_conversation().await;
    let cleared = engine.snapshot().await;
    ensure(
        "clear_silent",
        cleared.is_empty() && cleared.loading_counter() == 0 && cleared.hydrating_counter() == 0,
        "clear left state behind",
    )?;
    println!("clear_silent=true");
    println!("runner_ok=true");
    Ok(())
}

/// Feeds a JSON-lines file of stream chunks through a fresh engine.
async fn run_replay(settings: &EngineSettings, path: &Path) -> RunnerResult<()> {
    let engine = ChatEngine::new(settings.clone());
    let content = std::fs::read_to_string(path)
        .map_err(|source| EngineError::ReadScenarioFile {
            stage: "read-replay-file",
            path: path.to_path_buf(),
            source,
        })
        .context(EngineSnafu {
            stage: "replay-open",
        })?;

    let mut applied = 0usize;
    let mut ignored = 0usize;
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = engine.add_chunk_json(line).await.context(ReplayLineSnafu {
            stage: "replay-apply-line",
            line: index + 1,
        })?;
        println!("replay_line_{}={}", index + 1, outcome.label());
        if outcome.is_ignored() {
            ignored += 1;
        } else {
            applied += 1;
        }
    }

    let snapshot = engine.snapshot().await;
    println!("replay_applied={applied}");
    println!("replay_ignored={ignored}");
    println!("replay_messages={}", snapshot.message_order().len());
    println!("replay_streaming_items={}", snapshot.streaming_item_count());
    ensure_invariants("replay", &snapshot)?;
    println!("runner_ok=true");
    Ok(())
}

fn rendered_text(snapshot: &StoreSnapshot, response_id: &str, item_id: &str) -> Option<String> {
    let id = LocalItemId::for_streaming_item(&MessageId::new(response_id), item_id);
    snapshot
        .item(&id)
        .and_then(|item| item.item.streamable_text())
        .map(str::to_string)
}

fn ensure_invariants(scenario: &'static str, snapshot: &StoreSnapshot) -> RunnerResult<()> {
    snapshot
        .check_invariants()
        .map_err(|reason| RunnerError::ScenarioFailed {
            stage: "check-store-invariants",
            scenario,
            reason,
        })
}

fn ensure(scenario: &'static str, condition: bool, reason: impl Into<String>) -> RunnerResult<()> {
    if condition {
        return Ok(());
    }

    ScenarioFailedSnafu {
        stage: "scenario-assertion",
        scenario,
        reason: reason.into(),
    }
    .fail()
}

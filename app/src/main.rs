mod args;
mod display;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use lumen_bridge::dummy::DummyStack;
use lumen_bridge::{
    BridgeContext, BridgeResult, DisplayConsumer, RenderMode, RenderOutcome, SceneDiff, Session,
    StartConfig, ViewContext,
};

use args::RenderArgs;
use display::ConsoleDisplay;

fn main() -> ExitCode {
    logging::init();
    lumen_bridge::init();

    let args = RenderArgs::parse();
    let config = lumen_bridge::load_or_default(&args.config);

    let stack = DummyStack::new();
    stack.engine.configure(|s| {
        s.framebuffer_width = args.width as usize;
        s.framebuffer_height = args.height as usize;
    });

    let context = BridgeContext::init(stack.collaborators(), config);
    let display = Arc::new(ConsoleDisplay::new());
    let session = context.new_session();

    let result = if args.mode.is_interactive() {
        run_interactive(&session, &args, &context, &display)
    } else {
        run_frames(&session, &args, &display)
    };

    // Releases a scene graph retained by --persistent.
    session.stop(true);
    drop(session);
    context.shutdown();

    match result {
        Ok(()) => {
            log::info!(
                "done: {} scene graph(s) created, {} frame(s) presented, {} redraw(s)",
                stack.engine.created_scenes(),
                display.frames(),
                display.redraws()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("render failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn start_config(args: &RenderArgs, display: &Arc<ConsoleDisplay>, frame: i32) -> StartConfig {
    let display: Arc<dyn DisplayConsumer> = display.clone();
    StartConfig {
        view: ViewContext {
            width: args.width,
            height: args.height,
            frame,
            ..ViewContext::default()
        },
        persistent: Some(args.persistent),
        display: Some(Arc::downgrade(&display)),
        ..StartConfig::default()
    }
}

fn run_frames(
    session: &Session,
    args: &RenderArgs,
    display: &Arc<ConsoleDisplay>,
) -> BridgeResult<()> {
    for frame in 1..=args.frames as i32 {
        let config = start_config(args, display, frame);
        let outcome = match args.mode {
            RenderMode::Bake => session.start_bake(config)?,
            RenderMode::Swatch => session.start_swatch(config)?,
            RenderMode::External => session.start_external(config)?,
            _ => session.start_batch(config)?,
        };
        log::info!("frame {frame}: {outcome:?}");
        if outcome != RenderOutcome::Completed {
            break;
        }
    }
    Ok(())
}

fn run_interactive(
    session: &Session,
    args: &RenderArgs,
    context: &BridgeContext,
    display: &Arc<ConsoleDisplay>,
) -> BridgeResult<()> {
    let mut config = start_config(args, display, 1);
    config.viewport = args.mode == RenderMode::Viewport;
    config.notifier = args.notify_strategy(context.config().refresh_interval());

    session.start_interactive(config)?;

    let half = args.live_duration / 2;
    thread::sleep(half);
    session.update_view(&SceneDiff::view())?;
    thread::sleep(args.live_duration - half);

    let stats = session.stats();
    log::info!(
        "live render at {:.0}% after {:?}",
        stats.progress * 100.0,
        args.live_duration
    );
    session.stop(true);
    Ok(())
}

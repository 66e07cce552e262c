use anyhow::{Context, Result};
use bingdaily_cli::{custom_interval_label, prompt_custom_interval, BingDailyApp};
use bingdaily_core::config::{interval_label, INTERVAL_PRESETS};
use bingdaily_core::{SchedulerEvent, UpdateScheduler};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tao::{
    event::{Event, StartCause},
    event_loop::{ControlFlow, EventLoopBuilder},
};
use tray_icon::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu},
    Icon, TrayIcon, TrayIconBuilder, TrayIconEvent,
};

use crate::icon::{default_icon_rgba, thumbnail_rgba, ICON_SIZE};

const TOOLTIP: &str = "Bing Daily Wallpaper";

enum UserEvent {
    TrayIconEvent(TrayIconEvent),
    MenuEvent(MenuEvent),
    Scheduler(SchedulerEvent),
}

#[derive(Debug, Clone)]
enum Action {
    CheckNow,
    SetInterval(u32),
    CustomInterval,
    ApplyImage(PathBuf),
    OpenFolder,
    Exit,
}

fn create_tray_menu(app: &BingDailyApp) -> Result<(Menu, HashMap<MenuId, Action>)> {
    let tray_menu = Menu::new();
    let mut actions = HashMap::new();

    let current_item = MenuItem::new(
        format!("Current: {}", app.get_current_image_title()),
        false,
        None,
    );
    let last_check_item = MenuItem::new(format!("Last check: {}", app.last_check_text()), false, None);

    let check_item = MenuItem::new("Check Now", true, None);
    actions.insert(check_item.id().clone(), Action::CheckNow);

    let minutes = app.interval_minutes();
    let interval_menu = Submenu::new(format!("Interval ({})", interval_label(minutes)), true);
    for (label, preset) in INTERVAL_PRESETS {
        let item = CheckMenuItem::new(*label, true, *preset == minutes, None);
        actions.insert(item.id().clone(), Action::SetInterval(*preset));
        interval_menu.append(&item)?;
    }
    let custom_item = match custom_interval_label(minutes) {
        Some(label) => CheckMenuItem::new(label, true, true, None),
        None => CheckMenuItem::new("Custom...", true, false, None),
    };
    actions.insert(custom_item.id().clone(), Action::CustomInterval);
    interval_menu.append_items(&[&PredefinedMenuItem::separator(), &custom_item])?;

    let gallery_menu = Submenu::new("Gallery", true);
    let images = app.gallery();
    if images.is_empty() {
        gallery_menu.append(&MenuItem::new("(no images yet)", false, None))?;
    }
    for path in images {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("(unnamed)")
            .to_string();
        let item = MenuItem::new(name, true, None);
        actions.insert(item.id().clone(), Action::ApplyImage(path));
        gallery_menu.append(&item)?;
    }

    let folder_item = MenuItem::new("Open Image Folder", true, None);
    actions.insert(folder_item.id().clone(), Action::OpenFolder);
    let quit_item = MenuItem::new("Exit", true, None);
    actions.insert(quit_item.id().clone(), Action::Exit);

    tray_menu.append_items(&[
        &current_item,
        &last_check_item,
        &PredefinedMenuItem::separator(),
        &check_item,
        &interval_menu,
        &gallery_menu,
        &folder_item,
        &PredefinedMenuItem::separator(),
        &quit_item,
    ])?;

    Ok((tray_menu, actions))
}

fn update_tray_menu(tray_icon: &TrayIcon, app: &BingDailyApp, actions: &mut HashMap<MenuId, Action>) {
    match create_tray_menu(app) {
        Ok((menu, new_actions)) => {
            *actions = new_actions;
            tray_icon.set_menu(Some(Box::new(menu)));
        }
        Err(e) => log::error!("Failed to rebuild tray menu: {:#}", e),
    }
}

fn load_icon(wallpaper: Option<&Path>) -> Result<Icon> {
    let rgba = match wallpaper.map(thumbnail_rgba) {
        Some(Ok(rgba)) => rgba,
        Some(Err(e)) => {
            log::warn!("Using default tray icon: {:#}", e);
            default_icon_rgba()
        }
        None => default_icon_rgba(),
    };
    Icon::from_rgba(rgba, ICON_SIZE, ICON_SIZE).context("Failed to create icon")
}

fn update_tray_icon(tray_icon: &TrayIcon, wallpaper: &Path) {
    let result = load_icon(Some(wallpaper)).and_then(|icon| {
        tray_icon
            .set_icon(Some(icon))
            .context("Failed to set tray icon")
    });
    if let Err(e) = result {
        log::warn!("{:#}", e);
    }
}

/// Read a custom interval from the console on its own thread, so the event
/// loop keeps running while the user types.
fn ask_custom_interval(
    scheduler: Arc<UpdateScheduler>,
    prompting: Arc<AtomicBool>,
    keep_console: bool,
) -> Result<()> {
    if prompting.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    crate::show_console();
    let spawned = thread::Builder::new()
        .name("custom-interval".into())
        .spawn(move || {
            println!("\nEnter a custom check interval in minutes (Enter to cancel).");
            let stdin = io::stdin();
            let stdout = io::stdout();
            match prompt_custom_interval(&mut stdin.lock(), &mut stdout.lock()) {
                Ok(Some(minutes)) => {
                    if let Err(e) = scheduler.set_interval(minutes) {
                        log::error!("Failed to save config: {}", e);
                    }
                }
                Ok(None) => log::debug!("Custom interval cancelled"),
                Err(e) => log::warn!("{:#}", e),
            }
            if !keep_console {
                crate::hide_console();
            }
            prompting.store(false, Ordering::SeqCst);
        });
    if let Err(e) = spawned {
        prompting.store(false, Ordering::SeqCst);
        return Err(e).context("Failed to start interval prompt");
    }
    Ok(())
}

fn set_tooltip(tray_icon: &TrayIcon, status: &str) {
    // Windows truncates tray tooltips at 128 UTF-16 units
    let text: String = format!("{}\n{}", TOOLTIP, status).chars().take(120).collect();
    if let Err(e) = tray_icon.set_tooltip(Some(text)) {
        log::warn!("Failed to set tooltip: {}", e);
    }
}

/// Run the tray until "Exit". Never returns. With `keep_console` the debug
/// console stays visible after a custom interval prompt.
pub fn run(mut app: BingDailyApp, keep_console: bool) -> Result<()> {
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();

    let proxy = event_loop.create_proxy();
    TrayIconEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::TrayIconEvent(event));
    }));

    let proxy = event_loop.create_proxy();
    MenuEvent::set_event_handler(Some(move |event| {
        let _ = proxy.send_event(UserEvent::MenuEvent(event));
    }));

    // scheduler events cross into the event loop; the tray itself is only
    // touched on this thread
    if let Some(events) = app.take_events() {
        let proxy = event_loop.create_proxy();
        thread::Builder::new()
            .name("event-forwarder".into())
            .spawn(move || {
                for event in events {
                    if proxy.send_event(UserEvent::Scheduler(event)).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to start event forwarder")?;
    }

    let _scheduler = app.start_background()?;
    log::info!("Tray started");

    let mut tray_icon: Option<TrayIcon> = None;
    let mut actions: HashMap<MenuId, Action> = HashMap::new();
    let prompting = Arc::new(AtomicBool::new(false));

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        match event {
            Event::NewEvents(StartCause::Init) => {
                let built = create_tray_menu(&app).and_then(|(menu, menu_actions)| {
                    actions = menu_actions;
                    TrayIconBuilder::new()
                        .with_menu(Box::new(menu))
                        .with_tooltip(TOOLTIP)
                        .with_icon(load_icon(None)?)
                        .build()
                        .context("Failed to build tray icon")
                });
                match built {
                    Ok(icon) => tray_icon = Some(icon),
                    Err(e) => {
                        log::error!("{:#}", e);
                        app.shutdown();
                        *control_flow = ControlFlow::Exit;
                    }
                }
            }

            Event::UserEvent(UserEvent::TrayIconEvent(_)) => {}

            Event::UserEvent(UserEvent::MenuEvent(event)) => {
                let Some(action) = actions.get(&event.id).cloned() else {
                    log::debug!("Unknown menu item clicked: {:?}", event.id);
                    return;
                };
                log::debug!("Menu action: {:?}", action);

                match action {
                    Action::CheckNow => {
                        if let Err(e) = app.scheduler().spawn_check_now() {
                            log::error!("Failed to start check: {}", e);
                        }
                    }
                    Action::SetInterval(minutes) => {
                        if let Err(e) = app.set_interval(minutes) {
                            log::error!("{:#}", e);
                        }
                    }
                    Action::CustomInterval => {
                        let asked = ask_custom_interval(
                            Arc::clone(app.scheduler()),
                            Arc::clone(&prompting),
                            keep_console,
                        );
                        if let Err(e) = asked {
                            log::error!("{:#}", e);
                        }
                        // undo the native check toggle until a value arrives
                        if let Some(icon) = tray_icon.as_ref() {
                            update_tray_menu(icon, &app, &mut actions);
                        }
                    }
                    Action::ApplyImage(path) => {
                        if let Err(e) = app.scheduler().spawn_apply_path(path) {
                            log::error!("Failed to start wallpaper change: {}", e);
                        }
                    }
                    Action::OpenFolder => {
                        if let Err(e) = app.open_image_folder() {
                            log::error!("{:#}", e);
                        }
                    }
                    Action::Exit => {
                        log::info!("Exiting");
                        app.shutdown();
                        tray_icon.take();
                        *control_flow = ControlFlow::Exit;
                    }
                }
            }

            Event::UserEvent(UserEvent::Scheduler(event)) => {
                let Some(icon) = tray_icon.as_ref() else {
                    return;
                };
                match &event {
                    SchedulerEvent::CheckStarted { .. } => set_tooltip(icon, "Checking..."),
                    SchedulerEvent::WallpaperApplied(path) => {
                        update_tray_icon(icon, path);
                        set_tooltip(icon, &app.get_current_image_title());
                    }
                    SchedulerEvent::WallpaperUnchanged(_) => {
                        set_tooltip(icon, &app.get_current_image_title())
                    }
                    SchedulerEvent::CheckFailed(reason) => {
                        set_tooltip(icon, &format!("Last check failed: {}", reason))
                    }
                    SchedulerEvent::ApplyFailed(reason) => {
                        set_tooltip(icon, &format!("Failed to set wallpaper: {}", reason))
                    }
                    SchedulerEvent::IntervalChanged(_) => {}
                }
                update_tray_menu(icon, &app, &mut actions);
            }

            _ => {}
        }
    })
}

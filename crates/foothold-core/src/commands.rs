use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::app::App;
use crate::cli::{CategoryCommand, CategoryMoveTarget, Command, ItemFields, ListArgs, SubtaskCommand};
use crate::config::Config;
use crate::datastore::Storage;
use crate::datetime::{parse_due_date, parse_due_time};
use crate::item::{ItemDraft, ItemId, SubtaskDraft};
use crate::notify::{HookNotifier, NotifierSet, StdoutNotifier};
use crate::reminder::{DEFAULT_TICK_SECONDS, NotificationPermission, ReminderScheduler};
use crate::render::{ItemRow, Renderer, format_instant};
use crate::reorder::drop_in_column;
use crate::status::StatusThresholds;
use crate::transfer::parse_document;

#[instrument(skip(app, cfg, renderer, data_dir, command))]
pub fn dispatch<S: Storage>(
    app: &mut App<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    data_dir: &Path,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add { title, fields } => cmd_add(app, &title, fields),
        Command::Edit {
            id,
            title,
            fields,
            clear_due,
            clear_reminders,
        } => cmd_edit(app, id, title, fields, clear_due, clear_reminders),
        Command::List(args) => cmd_list(app, renderer, args),
        Command::Show { id } => cmd_show(app, renderer, id),
        Command::Done { id } => cmd_done(app, id),
        Command::Delete { id } => cmd_delete(app, id),
        Command::Undo => cmd_undo(app),
        Command::Subtask(sub) => cmd_subtask(app, sub),
        Command::Move { id, target } => cmd_move(app, id, target.before),
        Command::Category(sub) => cmd_category(app, renderer, sub),
        Command::Settings {
            urgent_hours,
            upcoming_days,
            show_counts,
            theme,
        } => cmd_settings(app, urgent_hours, upcoming_days, show_counts, theme),
        Command::Export { path } => cmd_export(app, path.as_deref()),
        Command::Import { path } => cmd_import(app, path.as_deref()),
        Command::Remind { watch } => cmd_remind(app, cfg, data_dir, watch),
    }
}

#[instrument(skip(app, fields))]
fn cmd_add<S: Storage>(app: &mut App<S>, title: &str, fields: ItemFields) -> anyhow::Result<()> {
    info!("command add");

    let category = match fields.category.as_deref() {
        Some(raw) => resolve_category(app, raw)?,
        None => app
            .categories()
            .as_slice()
            .first()
            .map(|c| c.id.clone())
            .ok_or_else(|| anyhow!("no categories exist; add one with `foothold category add`"))?,
    };

    let mut draft = ItemDraft::new(title, category);
    apply_schedule(app, &mut draft, &fields)?;
    draft.description = fields.description.clone();
    draft.reminders = fields.reminders.clone();
    let mut staging = SubtaskDraft::default();
    for text in &fields.subtasks {
        let sub_id = app.next_id();
        staging.add(sub_id, text);
    }
    draft.subtasks = staging.into_vec();

    let id = app.create_item(draft)?;
    println!("Created item {id}.");
    Ok(())
}

#[instrument(skip(app, title, fields))]
fn cmd_edit<S: Storage>(
    app: &mut App<S>,
    id: ItemId,
    title: Option<String>,
    fields: ItemFields,
    clear_due: bool,
    clear_reminders: bool,
) -> anyhow::Result<()> {
    info!("command edit");

    let Some((mut draft, mut staging)) = app
        .item(id)
        .map(|item| (item.to_draft(), SubtaskDraft::from_item(item)))
    else {
        println!("No item {id}.");
        return Ok(());
    };

    if let Some(title) = title {
        draft.title = title;
    }
    if let Some(raw) = fields.category.as_deref() {
        draft.category = resolve_category(app, raw)?;
    }
    if clear_due {
        draft.due_date = None;
        draft.due_time = None;
    }
    apply_schedule(app, &mut draft, &fields)?;
    if let Some(description) = &fields.description {
        draft.description = Some(description.clone());
    }
    if clear_reminders {
        draft.reminders.clear();
    }
    if !fields.reminders.is_empty() {
        draft.reminders = fields.reminders.clone();
    }
    for text in &fields.subtasks {
        let sub_id = app.next_id();
        staging.add(sub_id, text);
    }
    draft.subtasks = staging.into_vec();

    if app.update_item(id, draft)? {
        println!("Updated item {id}.");
    } else {
        println!("No item {id}.");
    }
    Ok(())
}

/// Applies `--due`/`--time`. A time with no date anywhere is dropped.
fn apply_schedule<S: Storage>(
    app: &App<S>,
    draft: &mut ItemDraft,
    fields: &ItemFields,
) -> anyhow::Result<()> {
    if let Some(raw) = fields.due.as_deref() {
        draft.due_date = Some(parse_due_date(raw, app.clock().today())?);
    }
    if let Some(raw) = fields.time.as_deref() {
        draft.due_time = Some(parse_due_time(raw)?);
        if draft.due_date.is_none() {
            warn!(time = raw, "due time ignored without a due date");
        }
    }
    Ok(())
}

#[instrument(skip(app, renderer, args))]
fn cmd_list<S: Storage>(
    app: &mut App<S>,
    renderer: &mut Renderer,
    args: ListArgs,
) -> anyhow::Result<()> {
    info!("command list");

    apply_list_filter(app, &args);

    let now = app.now();
    let rows: Vec<ItemRow<'_>> = app
        .view()
        .into_iter()
        .map(|item| ItemRow {
            item,
            category: app.category_name(&item.category),
            status: app.status_of(item, now),
        })
        .collect();
    renderer.print_item_table(&rows)
}

fn apply_list_filter<S: Storage>(app: &mut App<S>, args: &ListArgs) {
    let mut selected = Vec::new();
    for raw in &args.category {
        match app.categories().resolve(raw) {
            Some(category) => selected.push(category.id.clone()),
            None => warn!(category = %raw, "ignoring unknown category"),
        }
    }

    let filter = app.filter_mut();
    for id in &selected {
        filter.select(id);
    }
    filter.show_completed = args.completed;
    filter.set_search(args.search.as_deref().unwrap_or_default());
    filter.sort_mode = args.sort;
}

#[instrument(skip(app, renderer))]
fn cmd_show<S: Storage>(app: &App<S>, renderer: &mut Renderer, id: ItemId) -> anyhow::Result<()> {
    info!("command show");

    let Some(item) = app.item(id) else {
        println!("No item {id}.");
        return Ok(());
    };
    let status = app.status_of(item, app.now());
    renderer.print_item_info(item, app.category_name(&item.category), status)
}

#[instrument(skip(app))]
fn cmd_done<S: Storage>(app: &mut App<S>, id: ItemId) -> anyhow::Result<()> {
    info!("command done");

    match app.toggle_item(id) {
        Some(true) => println!("Completed item {id}."),
        Some(false) => println!("Reopened item {id}."),
        None => println!("No item {id}."),
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_delete<S: Storage>(app: &mut App<S>, id: ItemId) -> anyhow::Result<()> {
    info!("command delete");

    match app.delete_item(id) {
        Some(deleted) => println!(
            "Deleted item {id} ({}). `foothold undo` restores it.",
            deleted.item.title
        ),
        None => println!("No item {id}."),
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_undo<S: Storage>(app: &mut App<S>) -> anyhow::Result<()> {
    info!("command undo");

    if app.last_deleted().is_none() {
        println!("Nothing to undo.");
        return Ok(());
    }
    match app.undo_delete() {
        Some(id) => println!("Restored item {id}."),
        None => println!("The deleted item is already back; nothing restored."),
    }
    Ok(())
}

#[instrument(skip(app, command))]
fn cmd_subtask<S: Storage>(app: &mut App<S>, command: SubtaskCommand) -> anyhow::Result<()> {
    info!("command subtask");

    match command {
        SubtaskCommand::Add { item, text } => {
            match app.edit_subtasks(item, |staging, next_id| staging.add(next_id(), &text)) {
                None => println!("No item {item}."),
                Some(false) => return Err(anyhow!("subtask text must not be empty")),
                Some(true) => println!("Added subtask to item {item}."),
            }
        }
        SubtaskCommand::Remove { item, position } => {
            let removed = app.edit_subtasks(item, |staging, _| {
                position.checked_sub(1).and_then(|index| staging.remove(index))
            });
            match removed {
                None => println!("No item {item}."),
                Some(None) => println!("Item {item} has no subtask at position {position}."),
                Some(Some(subtask)) => println!("Removed subtask '{}'.", subtask.text),
            }
        }
        SubtaskCommand::Toggle { item, subtask } => match app.toggle_subtask(item, subtask) {
            Some(true) => println!("Checked subtask {subtask}."),
            Some(false) => println!("Unchecked subtask {subtask}."),
            None => println!("No subtask {subtask} on item {item}."),
        },
        SubtaskCommand::Move {
            item,
            subtask,
            target,
        } => {
            let moved = app.edit_subtasks(item, |staging, _| {
                let ids: Vec<i64> = staging.as_slice().iter().map(|s| s.id).collect();
                match drop_in_column(&ids, &subtask, target.before.as_ref()) {
                    Some(order) => {
                        staging.reorder(&order);
                        true
                    }
                    None => false,
                }
            });
            match moved {
                None => println!("No item {item}."),
                Some(false) => println!("No such subtask on item {item}."),
                Some(true) => println!("Moved subtask {subtask}."),
            }
        }
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_move<S: Storage>(app: &mut App<S>, id: ItemId, before: Option<ItemId>) -> anyhow::Result<()> {
    info!("command move");

    if app.move_item(id, before)? {
        println!("Moved item {id}.");
    } else {
        println!("Item {id} is not in the current view.");
    }
    Ok(())
}

#[instrument(skip(app, renderer, command))]
fn cmd_category<S: Storage>(
    app: &mut App<S>,
    renderer: &mut Renderer,
    command: CategoryCommand,
) -> anyhow::Result<()> {
    info!("command category");

    match command {
        CategoryCommand::List => {
            let counts = app.settings().show_counts;
            renderer.print_categories(app.categories(), counts, |id| app.active_count(id))?;
        }
        CategoryCommand::Add { name } => match app.add_category(&name) {
            Some(id) => println!("Created category {id}."),
            None => return Err(anyhow!("category name must not be empty")),
        },
        CategoryCommand::Rename { category, name } => {
            let id = resolve_category(app, &category)?;
            if app.rename_category(&id, &name) {
                println!("Renamed category {id}.");
            } else {
                return Err(anyhow!("category name must not be empty"));
            }
        }
        CategoryCommand::Delete { category } => {
            let id = resolve_category(app, &category)?;
            let name = app.category_name(&id).to_string();
            if let Some(removed) = app.delete_category(&id) {
                println!("Deleted category {name} and {removed} item(s).");
            }
        }
        CategoryCommand::Move { category, target } => {
            let id = resolve_category(app, &category)?;
            let before = category_target(app, target)?;
            app.move_category(&id, before.as_deref());
            println!("Moved category {id}.");
        }
    }
    Ok(())
}

fn category_target<S: Storage>(
    app: &App<S>,
    target: CategoryMoveTarget,
) -> anyhow::Result<Option<String>> {
    target
        .before
        .map(|raw| resolve_category(app, &raw))
        .transpose()
}

fn resolve_category<S: Storage>(app: &App<S>, raw: &str) -> anyhow::Result<String> {
    app.categories()
        .resolve(raw)
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("unknown category: {raw}"))
}

#[instrument(skip(app, theme))]
fn cmd_settings<S: Storage>(
    app: &mut App<S>,
    urgent_hours: Option<u32>,
    upcoming_days: Option<u32>,
    show_counts: Option<bool>,
    theme: Option<String>,
) -> anyhow::Result<()> {
    info!("command settings");

    if urgent_hours.is_some() || upcoming_days.is_some() {
        let current = app.settings().thresholds;
        app.set_thresholds(StatusThresholds {
            urgent_hours: urgent_hours.unwrap_or(current.urgent_hours),
            upcoming_days: upcoming_days.unwrap_or(current.upcoming_days),
        });
    }
    if let Some(show) = show_counts {
        app.set_show_counts(show);
    }
    if let Some(theme) = theme {
        app.set_theme(&theme);
    }

    let settings = app.settings();
    println!("urgent-hours   {}", settings.thresholds.urgent_hours);
    println!("upcoming-days  {}", settings.thresholds.upcoming_days);
    println!("show-counts    {}", settings.show_counts);
    println!("theme          {}", settings.theme.as_deref().unwrap_or("-"));
    Ok(())
}

#[instrument(skip(app))]
fn cmd_export<S: Storage>(app: &App<S>, path: Option<&Path>) -> anyhow::Result<()> {
    info!("command export");

    let text = app.export().to_json()?;
    match path {
        Some(path) => {
            fs::write(path, format!("{text}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported to {}.", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[instrument(skip(app))]
fn cmd_import<S: Storage>(app: &mut App<S>, path: Option<&Path>) -> anyhow::Result<()> {
    info!("command import");

    let text = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed reading stdin")?;
            buf
        }
    };

    let doc = parse_document(&text)?;
    let (items, categories) = (doc.items.len(), doc.categories.len());
    app.import(doc);
    println!("Imported {items} item(s) and {categories} category(ies).");
    Ok(())
}

#[instrument(skip(app, cfg, data_dir))]
fn cmd_remind<S: Storage>(
    app: &mut App<S>,
    cfg: &Config,
    data_dir: &Path,
    watch: bool,
) -> anyhow::Result<()> {
    info!("command remind");

    let permission = match cfg.get("notify.permission") {
        Some(raw) => raw.parse::<NotificationPermission>()?,
        None => NotificationPermission::Granted,
    };
    let tick_seconds = cfg
        .get_parsed::<u64>("reminder.tick_seconds")?
        .unwrap_or(DEFAULT_TICK_SECONDS);

    if !permission.is_granted() {
        info!(%permission, "notifications not granted; reminders disabled");
        return Ok(());
    }
    let mut scheduler = ReminderScheduler::new(permission, tick_seconds);

    let mut notifier = NotifierSet::new()
        .with(StdoutNotifier)
        .with(HookNotifier::new(cfg, data_dir));

    let period = std::time::Duration::from_secs(scheduler.window().num_seconds().unsigned_abs());
    let mut deadline = Instant::now();
    loop {
        let now = app.now();
        let fired = scheduler.tick(app.items(), now, &mut notifier);
        debug!(
            fired = fired.len(),
            at = %format_instant(now),
            "reminder tick finished"
        );
        if !watch {
            return Ok(());
        }

        deadline += period;
        let current = Instant::now();
        if deadline > current {
            std::thread::sleep(deadline - current);
        } else {
            debug!(behind = ?(current - deadline), "reminder tick overran its period");
            deadline = current;
        }
        if let Err(err) = app.refresh_items() {
            warn!(error = %format!("{err:#}"), "failed to reload items; keeping last snapshot");
        }
    }
}

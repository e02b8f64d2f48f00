use clap::{Subcommand, ValueEnum};
use std::io::{self, Write};
use tokio::sync::watch;

use holiday_planner::{Holiday, HolidayRepository, HolidayViewModel};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum HolidayCommand {
    /// Add a new holiday
    Add {
        /// Title of the holiday
        title: String,

        /// Where the trip goes
        #[arg(long)]
        location: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,

        /// Start date (free-form, e.g. 2024-06-01)
        #[arg(long)]
        start_date: Option<String>,

        /// End date (free-form)
        #[arg(long)]
        end_date: Option<String>,
    },

    /// List holidays, newest first
    List {
        /// Only show holidays whose title or location contains this text
        #[arg(long, short)]
        query: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a holiday's details
    Show {
        /// Holiday ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing holiday
    Update {
        /// Holiday ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New location
        #[arg(long)]
        location: Option<String>,

        /// New notes
        #[arg(long)]
        notes: Option<String>,

        /// New start date
        #[arg(long)]
        start_date: Option<String>,

        /// New end date
        #[arg(long)]
        end_date: Option<String>,
    },

    /// Delete a holiday
    Delete {
        /// Holiday ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Print the list every time it changes, until Ctrl-C
    Watch {
        /// Only show holidays whose title or location contains this text
        #[arg(long, short)]
        query: Option<String>,
    },
}

impl HolidayCommand {
    pub async fn run(
        &self,
        repo: &HolidayRepository,
        vm: &HolidayViewModel,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            HolidayCommand::Add {
                title,
                location,
                notes,
                start_date,
                end_date,
            } => {
                validate_title(title)?;

                let holiday = Holiday {
                    title: title.clone(),
                    location: location.clone().unwrap_or_default(),
                    notes: notes.clone().unwrap_or_default(),
                    start_date: start_date.clone().unwrap_or_default(),
                    end_date: end_date.clone().unwrap_or_default(),
                    ..Holiday::default()
                };

                let id = vm.add_holiday(holiday).await;
                fail_on_error(vm)?;

                let created = match id {
                    Some(id) => repo.get_by_id(&id).await?,
                    None => None,
                };
                if let Some(created) = created {
                    println!("Added holiday:");
                    println!("{}", created);
                }
                Ok(())
            }

            HolidayCommand::List { query, format } => {
                let holidays = repo.list(query.as_deref().unwrap_or("")).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&holidays)?);
                    }
                    OutputFormat::Text => print_table(&holidays),
                }
                Ok(())
            }

            HolidayCommand::Show { id, format } => match repo.get_by_id(id).await? {
                Some(holiday) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&holiday)?);
                        }
                        OutputFormat::Text => {
                            println!("{}", holiday);
                        }
                    }
                    Ok(())
                }
                None => Err(format!("Holiday not found: {}", id).into()),
            },

            HolidayCommand::Update {
                id,
                title,
                location,
                notes,
                start_date,
                end_date,
            } => {
                let has_updates = title.is_some()
                    || location.is_some()
                    || notes.is_some()
                    || start_date.is_some()
                    || end_date.is_some();

                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let mut holiday = match repo.get_by_id(id).await? {
                    Some(h) => h,
                    None => return Err(format!("Holiday not found: {}", id).into()),
                };

                if let Some(new_title) = title {
                    validate_title(new_title)?;
                    holiday.title = new_title.clone();
                }
                if let Some(new_location) = location {
                    holiday.location = new_location.clone();
                }
                if let Some(new_notes) = notes {
                    holiday.notes = new_notes.clone();
                }
                if let Some(new_start) = start_date {
                    holiday.start_date = new_start.clone();
                }
                if let Some(new_end) = end_date {
                    holiday.end_date = new_end.clone();
                }

                vm.update_holiday(holiday.clone()).await;
                fail_on_error(vm)?;

                println!("Updated holiday:");
                println!("{}", holiday);
                Ok(())
            }

            HolidayCommand::Delete { id, force } => {
                let holiday = match repo.get_by_id(id).await? {
                    Some(h) => h,
                    None => return Err(format!("Holiday not found: {}", id).into()),
                };

                // Confirm deletion unless --force is used
                if !force {
                    print!("Delete holiday '{}'? [y/N] ", holiday.title);
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                vm.delete_holiday(&holiday).await;
                fail_on_error(vm)?;

                println!("Deleted holiday: {}", holiday.title);
                Ok(())
            }

            HolidayCommand::Watch { query } => {
                if let Some(query) = query {
                    vm.set_query(query.clone());
                }

                let (mut holidays, mut errors) = watch_receivers(vm);
                println!("Watching holidays (Ctrl-C to stop)\n");

                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        changed = holidays.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            print_table(&holidays.borrow_and_update());
                            println!();
                        }
                        changed = errors.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if let Some(message) = errors.borrow_and_update().clone() {
                                return Err(message.into());
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Blank titles are rejected; anything else is stored as typed.
fn validate_title(title: &str) -> Result<(), Box<dyn std::error::Error>> {
    if title.trim().is_empty() {
        return Err("Enter title".into());
    }
    Ok(())
}

/// Receivers for the watch loop, both marked changed so values published
/// before the loop started are handled on its first pass.
fn watch_receivers(
    vm: &HolidayViewModel,
) -> (watch::Receiver<Vec<Holiday>>, watch::Receiver<Option<String>>) {
    let mut holidays = vm.holidays();
    let mut errors = vm.error();
    holidays.mark_changed();
    errors.mark_changed();
    (holidays, errors)
}

/// Turns the view model's error field into a command failure.
fn fail_on_error(vm: &HolidayViewModel) -> Result<(), Box<dyn std::error::Error>> {
    match vm.last_error() {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

fn print_table(holidays: &[Holiday]) {
    if holidays.is_empty() {
        println!("No holidays found");
        return;
    }

    println!("{:<20}  {:<30}  {:<20}  DATES", "ID", "TITLE", "LOCATION");
    println!("{}", "-".repeat(90));
    for holiday in holidays {
        println!(
            "{:<20}  {:<30}  {:<20}  {}",
            holiday.id,
            truncate(&holiday.title, 30),
            truncate(&holiday.location, 20),
            holiday.date_range().unwrap_or_default()
        );
    }
    println!("\nTotal: {} holiday(s)", holidays.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use holiday_planner::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watch_receivers_see_list_published_before_subscribing() {
        let repo = HolidayRepository::new(Arc::new(MemoryStore::new()));
        repo.create(&Holiday::new("Paris Trip")).await.unwrap();

        let vm = HolidayViewModel::new(repo);
        vm.set_query("paris");
        let mut published = vm.holidays();
        tokio::time::timeout(Duration::from_secs(2), published.wait_for(|l| l.len() == 1))
            .await
            .unwrap()
            .unwrap();

        let (mut holidays, mut errors) = watch_receivers(&vm);

        tokio::time::timeout(Duration::from_millis(500), holidays.changed())
            .await
            .expect("list already published should count as a change")
            .unwrap();
        assert_eq!(holidays.borrow_and_update().len(), 1);

        errors.changed().await.unwrap();
        assert!(errors.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_titles_are_stored_as_typed() {
        let repo = HolidayRepository::new(Arc::new(MemoryStore::new()));
        let vm = HolidayViewModel::new(repo.clone());

        HolidayCommand::Add {
            title: "  Paris Trip ".to_string(),
            location: Some("Paris".to_string()),
            notes: None,
            start_date: None,
            end_date: None,
        }
        .run(&repo, &vm)
        .await
        .unwrap();

        let stored = repo.list("").await.unwrap();
        assert_eq!(stored[0].title, "  Paris Trip ");

        HolidayCommand::Update {
            id: stored[0].id.clone(),
            title: Some(" Paris v2".to_string()),
            location: None,
            notes: None,
            start_date: None,
            end_date: None,
        }
        .run(&repo, &vm)
        .await
        .unwrap();

        let updated = repo.get_by_id(&stored[0].id).await.unwrap().unwrap();
        assert_eq!(updated.title, " Paris v2");
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let repo = HolidayRepository::new(Arc::new(MemoryStore::new()));
        let vm = HolidayViewModel::new(repo.clone());

        let err = HolidayCommand::Add {
            title: "   ".to_string(),
            location: None,
            notes: None,
            start_date: None,
            end_date: None,
        }
        .run(&repo, &vm)
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Enter title");
        assert!(repo.list("").await.unwrap().is_empty());
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Paris", 30), "Paris");
        assert_eq!(truncate("Zürich Zürich Zürich", 10), "Zürich ...");
    }
}

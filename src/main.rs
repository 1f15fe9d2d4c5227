use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::Result;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crm_sync::backend::{Page, Pagination, RestClient, SortDirection};
use crm_sync::cache::{CacheStorage, QueryClient, SqliteStorage};
use crm_sync::config::Config;
use crm_sync::crm::{
  label, AutomationFilters, Automations, CachedCrm, Companies, CompanyFilters, ContactFilters,
  ContactStatus, Contacts, Conversation, ConversationFilters, ConversationStatus, Conversations,
  CrmApi, DashboardStats, DateRange, Message, MessageDirection, NewContact, Opportunities,
  OpportunityFilters, OpportunityStage,
};
use crm_sync::notify::ConsoleNotifier;
use crm_sync::query::{Query, QueryState};

#[derive(Parser, Debug)]
#[command(name = "crm-sync")]
#[command(about = "Read and update a CRM backend through a local query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./crm-sync.yaml or $XDG_CONFIG_HOME/crm-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(subcommand)]
  Contacts(ContactsCommand),
  #[command(subcommand)]
  Companies(CompaniesCommand),
  #[command(subcommand)]
  Opportunities(OpportunitiesCommand),
  #[command(subcommand)]
  Activities(ActivitiesCommand),
  #[command(subcommand)]
  Conversations(ConversationsCommand),
  #[command(subcommand)]
  Automations(AutomationsCommand),
  /// Show headline numbers
  Dashboard {
    /// Keep refreshing until interrupted
    #[arg(long)]
    watch: bool,
  },
  #[command(subcommand)]
  Report(ReportCommand),
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(ClapArgs, Debug)]
struct PageArgs {
  #[arg(long, default_value_t = 1)]
  page: u32,
  #[arg(long, default_value_t = 25)]
  page_size: u32,
  /// Column to sort by
  #[arg(long)]
  sort: Option<String>,
  /// Sort ascending instead of descending
  #[arg(long)]
  asc: bool,
}

impl PageArgs {
  fn pagination(&self) -> Pagination {
    let pagination = Pagination::new(self.page, self.page_size);
    let direction = if self.asc {
      SortDirection::Asc
    } else {
      SortDirection::Desc
    };
    match &self.sort {
      Some(column) => pagination.sorted_by(column.clone(), direction),
      None => Pagination {
        sort_direction: direction,
        ..pagination
      },
    }
  }
}

#[derive(ClapArgs, Debug)]
struct RangeArgs {
  /// Start of the range (RFC 3339)
  #[arg(long, requires = "to")]
  from: Option<DateTime<Utc>>,
  /// End of the range (RFC 3339)
  #[arg(long, requires = "from")]
  to: Option<DateTime<Utc>>,
}

impl RangeArgs {
  fn range(&self) -> Option<DateRange> {
    Some(DateRange::new(self.from?, self.to?))
  }
}

fn parse_label<T: DeserializeOwned>(value: &str) -> std::result::Result<T, String> {
  serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
    .map_err(|_| format!("unknown value {:?}", value))
}

#[derive(Subcommand, Debug)]
enum ContactsCommand {
  List {
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_parser = parse_label::<ContactStatus>)]
    status: Option<ContactStatus>,
    #[command(flatten)]
    page: PageArgs,
  },
  Show {
    id: String,
  },
  Create {
    first_name: String,
    last_name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    company_id: Option<String>,
    #[arg(long, value_parser = parse_label::<ContactStatus>, default_value = "lead")]
    status: ContactStatus,
  },
  /// Delete one or more contacts
  Delete {
    #[arg(required = true)]
    ids: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum CompaniesCommand {
  List {
    #[arg(long)]
    search: Option<String>,
    #[command(flatten)]
    page: PageArgs,
  },
  Show {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum OpportunitiesCommand {
  List {
    #[arg(long, value_parser = parse_label::<OpportunityStage>)]
    stage: Option<OpportunityStage>,
    #[command(flatten)]
    page: PageArgs,
  },
  /// Move an opportunity to another pipeline stage
  Move {
    id: String,
    #[arg(value_parser = parse_label::<OpportunityStage>)]
    stage: OpportunityStage,
  },
}

#[derive(Subcommand, Debug)]
enum ActivitiesCommand {
  Calendar {
    #[command(flatten)]
    range: RangeArgs,
  },
  Complete {
    id: String,
    /// Mark as not completed
    #[arg(long)]
    undo: bool,
  },
}

#[derive(Subcommand, Debug)]
enum ConversationsCommand {
  List {
    #[arg(long, value_parser = parse_label::<ConversationStatus>)]
    status: Option<ConversationStatus>,
    #[command(flatten)]
    page: PageArgs,
  },
  Messages {
    id: String,
  },
  Send {
    id: String,
    body: String,
  },
  /// Follow the conversation list, or one conversation's messages
  Watch {
    id: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum AutomationsCommand {
  List {
    #[arg(long)]
    active: Option<bool>,
    #[command(flatten)]
    page: PageArgs,
  },
  Toggle {
    id: String,
    /// Deactivate instead of activate
    #[arg(long)]
    off: bool,
  },
}

#[derive(Subcommand, Debug)]
enum ReportCommand {
  Pipeline {
    #[command(flatten)]
    range: RangeArgs,
  },
  Activities {
    #[command(flatten)]
    range: RangeArgs,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Drop every cached result, including the on-disk copy
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = crm_sync::logging::init(&config.log)?;

  let client = build_client(&config);
  let _gc = client.spawn_gc(Duration::from_secs(60));

  let backend = Arc::new(RestClient::new(&config.backend)?);
  let crm = CachedCrm::new(
    CrmApi::new(backend),
    client,
    Arc::new(ConsoleNotifier),
    config.polling.clone(),
  );

  run(args.command, &crm).await
}

/// Query cache, persisted and hydrated when enabled. A store that cannot
/// be opened is skipped.
fn build_client(config: &Config) -> QueryClient {
  let cache_config = config.cache.cache_config();
  if !config.cache.persist {
    return QueryClient::new(cache_config);
  }

  match SqliteStorage::open(config.cache.path.as_deref()) {
    Ok(storage) => {
      let storage: Arc<dyn CacheStorage> = Arc::new(storage);
      let client = QueryClient::with_storage(cache_config, storage);
      let restored = client.hydrate();
      info!(restored, "query cache ready");
      client
    }
    Err(e) => {
      warn!(error = %e, "cache persistence disabled");
      QueryClient::new(cache_config)
    }
  }
}

async fn run(command: Command, crm: &CachedCrm) -> Result<()> {
  match command {
    Command::Contacts(cmd) => match cmd {
      ContactsCommand::List {
        search,
        status,
        page,
      } => {
        let filters = ContactFilters {
          search,
          status,
          ..Default::default()
        };
        let result = crm.list::<Contacts>(&filters, &page.pagination()).await?;
        print_page(&result, |c| {
          format!(
            "{}  {}  {}  {}",
            c.id,
            c.full_name(),
            c.email.as_deref().unwrap_or("-"),
            label(&c.status)
          )
        });
      }
      ContactsCommand::Show { id } => {
        let contact = crm.get::<Contacts>(&id).await?;
        println!("{}", serde_json::to_string_pretty(&contact)?);
      }
      ContactsCommand::Create {
        first_name,
        last_name,
        email,
        phone,
        company_id,
        status,
      } => {
        let input = NewContact {
          first_name,
          last_name,
          email,
          phone,
          company_id,
          status,
          ..Default::default()
        };
        let contact = crm.create::<Contacts>(&input).await?;
        println!("{}", contact.id);
      }
      ContactsCommand::Delete { ids } => {
        if let [id] = ids.as_slice() {
          crm.delete::<Contacts>(id).await?;
        } else {
          crm.delete_contacts(&ids).await?;
        }
      }
    },

    Command::Companies(cmd) => match cmd {
      CompaniesCommand::List { search, page } => {
        let filters = CompanyFilters {
          search,
          ..Default::default()
        };
        let result = crm.list::<Companies>(&filters, &page.pagination()).await?;
        print_page(&result, |c| {
          format!(
            "{}  {}  {}",
            c.id,
            c.name,
            c.domain.as_deref().unwrap_or("-")
          )
        });
      }
      CompaniesCommand::Show { id } => {
        let company = crm.get::<Companies>(&id).await?;
        println!("{}", serde_json::to_string_pretty(&company)?);
      }
    },

    Command::Opportunities(cmd) => match cmd {
      OpportunitiesCommand::List { stage, page } => {
        let filters = OpportunityFilters {
          stage,
          ..Default::default()
        };
        let result = crm
          .list::<Opportunities>(&filters, &page.pagination())
          .await?;
        print_page(&result, |o| {
          format!("{}  {}  {:.2}  {}", o.id, o.title, o.value, label(&o.stage))
        });
      }
      OpportunitiesCommand::Move { id, stage } => {
        crm.move_opportunity(&id, stage).await?;
      }
    },

    Command::Activities(cmd) => match cmd {
      ActivitiesCommand::Calendar { range } => {
        let events = crm.calendar_events(range.range().as_ref(), Utc::now()).await?;
        for event in events {
          let when = if event.all_day {
            "all day".to_string()
          } else {
            format!("{} - {}", event.start.format("%F %R"), event.end.format("%R"))
          };
          let done = if event.completed { "x" } else { " " };
          println!("[{}] {}  {}  ({})", done, when, event.title, label(&event.activity_type));
        }
      }
      ActivitiesCommand::Complete { id, undo } => {
        crm.set_activity_completed(&id, !undo).await?;
      }
    },

    Command::Conversations(cmd) => match cmd {
      ConversationsCommand::List { status, page } => {
        let filters = ConversationFilters {
          status,
          ..Default::default()
        };
        let result = crm
          .list::<Conversations>(&filters, &page.pagination())
          .await?;
        print_page(&result, conversation_line);
      }
      ConversationsCommand::Messages { id } => {
        for message in crm.messages(&id).await? {
          println!("{}", message_line(&message));
        }
      }
      ConversationsCommand::Send { id, body } => {
        crm.send_message(&id, &body).await?;
        crm.mark_conversation_read(&id).await?;
      }
      ConversationsCommand::Watch { id: Some(id) } => {
        watch(crm.messages_query(&id), |messages| {
          for message in messages {
            println!("{}", message_line(message));
          }
        })
        .await;
      }
      ConversationsCommand::Watch { id: None } => {
        let query =
          crm.conversations_query(&ConversationFilters::default(), &Pagination::default());
        watch(query, |page| print_page(page, conversation_line)).await;
      }
    },

    Command::Automations(cmd) => match cmd {
      AutomationsCommand::List { active, page } => {
        let filters = AutomationFilters {
          is_active: active,
          ..Default::default()
        };
        let result = crm.list::<Automations>(&filters, &page.pagination()).await?;
        print_page(&result, |a| {
          let state = if a.is_active { "on" } else { "off" };
          format!("{}  {}  {}  runs={}", a.id, a.name, state, a.run_count)
        });
      }
      AutomationsCommand::Toggle { id, off } => {
        crm.toggle_automation(&id, !off).await?;
      }
    },

    Command::Dashboard { watch: true } => {
      watch(crm.dashboard_query(), print_stats).await;
    }
    Command::Dashboard { watch: false } => {
      print_stats(&crm.dashboard_stats().await?);
      let upcoming = crm.upcoming_activities(5).await?;
      if !upcoming.is_empty() {
        println!("\nUpcoming:");
      }
      for activity in upcoming {
        let due = activity
          .due_date
          .map(|d| d.format("%F %R").to_string())
          .unwrap_or_default();
        println!("  {}  {}", due, activity.subject);
      }
    }

    Command::Report(cmd) => match cmd {
      ReportCommand::Pipeline { range } => {
        for row in crm.pipeline_report(range.range().as_ref()).await? {
          println!("{:<12} {:>5} {:>14.2}", label(&row.stage), row.count, row.total_value);
        }
      }
      ReportCommand::Activities { range } => {
        for row in crm.activity_report(range.range().as_ref()).await? {
          println!(
            "{:<10} {:>5} {:>5}",
            label(&row.activity_type),
            row.total,
            row.completed
          );
        }
      }
    },

    Command::Cache(CacheCommand::Clear) => {
      crm.client().clear();
      println!("Cache cleared");
    }
  }

  Ok(())
}

fn print_page<T>(page: &Page<T>, line: impl Fn(&T) -> String) {
  for item in &page.items {
    println!("{}", line(item));
  }
  println!(
    "-- page {}/{} ({} total)",
    page.page,
    page.total_pages().max(1),
    page.total
  );
}

fn conversation_line(c: &Conversation) -> String {
  let who = c
    .contact
    .as_ref()
    .map(|p| format!("{} {}", p.first_name, p.last_name))
    .unwrap_or_else(|| "-".to_string());
  let last = c
    .last_message_at
    .map(|t| t.format("%F %R").to_string())
    .unwrap_or_default();
  format!(
    "{}  {}  {}  {}  unread={}  {}",
    c.id,
    label(&c.channel),
    label(&c.status),
    who,
    c.unread_count,
    last
  )
}

fn message_line(m: &Message) -> String {
  let arrow = match m.direction {
    MessageDirection::Inbound => "<",
    MessageDirection::Outbound => ">",
  };
  format!("{} {} {}", m.created_at.format("%F %R"), arrow, m.body)
}

fn print_stats(stats: &DashboardStats) {
  println!("Contacts:             {}", stats.total_contacts);
  println!("Companies:            {}", stats.total_companies);
  println!("Open opportunities:   {}", stats.open_opportunities);
  println!("Pipeline value:       {:.2}", stats.pipeline_value);
  println!("Won value:            {:.2}", stats.won_value);
  println!("Activities due today: {}", stats.activities_due_today);
  println!("Open conversations:   {}", stats.open_conversations);
}

/// Drive an observed query until Ctrl-C, re-rendering on every change.
async fn watch<T: crm_sync::cache::Cacheable>(mut query: Query<T>, render: impl Fn(&T)) {
  let mut ticker = tokio::time::interval(Duration::from_millis(250));
  loop {
    tokio::select! {
      _ = ticker.tick() => {
        query.tick();
        if query.poll() {
          match query.state() {
            QueryState::Success(data) => {
              println!("--- {}", Utc::now().format("%T"));
              render(data);
            }
            QueryState::Error { error, .. } => eprintln!("[error] {}", error),
            QueryState::Loading | QueryState::Idle => {}
          }
        }
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }
}

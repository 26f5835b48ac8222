//! Terminal front-end — a stdin/stdout REPL over the board, the document
//! library and the session.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::auth::{Route, SessionManager};
use crate::documents::grouping::find_group;
use crate::documents::model::format_file_size;
use crate::documents::{DocumentGroup, DocumentLibrary};
use crate::tasks::board::{Board, BoardSnapshot};
use crate::tasks::tree::{self, TaskNode};
use crate::tasks::view::{TaskFilter, group_by_status};
use crate::tasks::{NewTask, Task, TaskPriority, TaskStatus};
use crate::users::{User, find_user, resolve_user};

const HELP: &str = "\
Commands:
  ls [status]              list tasks, optionally one column
  mine | ai                tasks assigned to you / to the agent
  board                    kanban columns
  show <id>                task details and subtasks
  add <title>              new backlog task
  sub <parent> <title>     new subtask
  mv <id> <status>         change status
  drop <id> <target>       drag a card onto a column or another card
  prio <id> <priority>     urgent | high | medium | low
  assign <id> <user|none>  name, me, ai or none
  due <id> <date|none>     YYYY-MM-DD
  rm <id>                  delete task and subtasks
  docs                     document groups
  doc <stem>               formats and links for one document
  refresh | dismiss        re-fetch / clear the error banner
  whoami | logout | quit
Ids may be shortened to any unique prefix.";

/// A parsed REPL command. Ids are kept as typed and resolved against the
/// board at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List { status: Option<TaskStatus> },
    Mine,
    Ai,
    Board,
    Show { id: String },
    Add { title: String },
    Sub { parent: String, title: String },
    Move { id: String, status: TaskStatus },
    Drop { id: String, target: String },
    Priority { id: String, priority: TaskPriority },
    Assign { id: String, user: Option<String> },
    Due { id: String, date: Option<NaiveDate> },
    Remove { id: String },
    Docs,
    Doc { stem: String },
    Refresh,
    Dismiss,
    WhoAmI,
    Logout,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "help" | "?" => Command::Help,
            "ls" | "list" => Command::List {
                status: if rest.is_empty() {
                    None
                } else {
                    Some(rest.parse()?)
                },
            },
            "mine" => Command::Mine,
            "ai" => Command::Ai,
            "board" => Command::Board,
            "show" => Command::Show {
                id: one_arg(rest, "show <id>")?,
            },
            "add" => Command::Add {
                title: non_empty(rest, "add <title>")?,
            },
            "sub" => {
                let (parent, title) = two_args(rest, "sub <parent> <title>")?;
                Command::Sub { parent, title }
            }
            "mv" | "move" => {
                let (id, status) = two_args(rest, "mv <id> <status>")?;
                Command::Move {
                    id,
                    status: status.parse()?,
                }
            }
            "drop" => {
                let (id, target) = two_args(rest, "drop <id> <target>")?;
                Command::Drop { id, target }
            }
            "prio" | "priority" => {
                let (id, priority) = two_args(rest, "prio <id> <priority>")?;
                Command::Priority {
                    id,
                    priority: priority.parse()?,
                }
            }
            "assign" => {
                let (id, user) = two_args(rest, "assign <id> <user|none>")?;
                Command::Assign {
                    id,
                    user: (!user.eq_ignore_ascii_case("none")).then_some(user),
                }
            }
            "due" => {
                let (id, date) = two_args(rest, "due <id> <YYYY-MM-DD|none>")?;
                let date = if date.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(
                        NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                            .map_err(|e| format!("bad date {date:?}: {e}"))?,
                    )
                };
                Command::Due { id, date }
            }
            "rm" | "delete" => Command::Remove {
                id: one_arg(rest, "rm <id>")?,
            },
            "docs" => Command::Docs,
            "doc" => Command::Doc {
                stem: non_empty(rest, "doc <stem>")?,
            },
            "refresh" => Command::Refresh,
            "dismiss" => Command::Dismiss,
            "whoami" => Command::WhoAmI,
            "logout" => Command::Logout,
            "quit" | "exit" | "/quit" => Command::Quit,
            "" => return Err("empty command".into()),
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        Ok(command)
    }
}

fn non_empty(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}

fn one_arg(rest: &str, usage: &str) -> Result<String, String> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [arg] => Ok((*arg).to_string()),
        _ => Err(format!("usage: {usage}")),
    }
}

/// First word, then the remainder of the line.
fn two_args(rest: &str, usage: &str) -> Result<(String, String), String> {
    match rest.split_once(char::is_whitespace) {
        Some((first, second)) if !second.trim().is_empty() => {
            Ok((first.to_string(), second.trim().to_string()))
        }
        _ => Err(format!("usage: {usage}")),
    }
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Output(String),
    Quit,
}

/// Find the unique task whose id starts with `prefix`.
pub fn resolve_task(snapshot: &BoardSnapshot, prefix: &str) -> Result<Uuid, String> {
    let prefix = prefix.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        return Err("missing task id".into());
    }
    let matches: Vec<Uuid> = tree::flatten(&snapshot.tasks)
        .into_iter()
        .map(|t| t.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("no task matches {prefix}")),
        _ => Err(format!("{prefix} is ambiguous ({} tasks)", matches.len())),
    }
}

fn short(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn task_line(task: &Task, users: &[User], pending: bool) -> String {
    let mut line = format!(
        "{} [{}] {:<6} {}",
        short(task.id),
        task.status,
        task.priority.as_str(),
        task.title
    );
    if let Some(user) = task.assignee_id.and_then(|id| find_user(users, id)) {
        let _ = write!(line, " @{}", user.badge());
    }
    if let Some(due) = task.due_date {
        let _ = write!(line, " due {due}");
    }
    if pending {
        line.push_str(" (saving)");
    }
    line
}

fn render_nodes(nodes: &[&TaskNode], snapshot: &BoardSnapshot) -> String {
    if nodes.is_empty() {
        return "No tasks.".into();
    }
    let mut out = String::new();
    for node in nodes {
        let _ = writeln!(
            out,
            "{}",
            task_line(&node.task, &snapshot.users, snapshot.is_pending(node.id()))
        );
        for sub in &node.subtasks {
            let _ = writeln!(
                out,
                "    └ {}",
                task_line(&sub.task, &snapshot.users, snapshot.is_pending(sub.id()))
            );
        }
    }
    out.trim_end().to_string()
}

fn render_board(snapshot: &BoardSnapshot) -> String {
    let mut out = String::new();
    for column in group_by_status(&snapshot.tasks) {
        let _ = writeln!(out, "{} ({})", column.status.label(), column.tasks.len());
        for node in &column.tasks {
            let done = node
                .subtasks
                .iter()
                .filter(|s| s.task.status == TaskStatus::Done)
                .count();
            let _ = write!(out, "  {} {}", short(node.id()), node.task.title);
            if !node.subtasks.is_empty() {
                let _ = write!(out, " [{done}/{}]", node.subtasks.len());
            }
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

fn render_task(node: &TaskNode, snapshot: &BoardSnapshot) -> String {
    let task = &node.task;
    let mut out = format!("{}\n  id:       {}\n", task.title, task.id);
    let _ = writeln!(out, "  status:   {}", task.status.label());
    let _ = writeln!(out, "  priority: {}", task.priority);
    let assignee = task
        .assignee_id
        .and_then(|id| find_user(&snapshot.users, id))
        .map_or("unassigned".to_string(), |u| u.name.clone());
    let _ = writeln!(out, "  assignee: {assignee}");
    if let Some(due) = task.due_date {
        let _ = writeln!(out, "  due:      {due}");
    }
    if let Some(done) = task.completed_at {
        let _ = writeln!(out, "  done:     {}", done.format("%Y-%m-%d %H:%M"));
    }
    if let Some(description) = &task.description {
        let _ = writeln!(out, "\n{description}");
    }
    if !node.subtasks.is_empty() {
        let _ = writeln!(out, "\nSubtasks:");
        for sub in &node.subtasks {
            let _ = writeln!(
                out,
                "  {}",
                task_line(&sub.task, &snapshot.users, snapshot.is_pending(sub.id()))
            );
        }
    }
    out.trim_end().to_string()
}

fn render_groups(groups: &[DocumentGroup]) -> String {
    if groups.is_empty() {
        return "No documents.".into();
    }
    let mut out = String::new();
    for group in groups {
        let formats: Vec<String> = group.formats().iter().map(|f| f.to_string()).collect();
        let _ = writeln!(
            out,
            "{}  [{}]  {}",
            group.stem,
            formats.join(", "),
            format_file_size(group.total_size())
        );
    }
    out.trim_end().to_string()
}

/// Executes commands against the shared controllers.
pub struct Repl {
    board: Arc<Board>,
    library: Arc<DocumentLibrary>,
    sessions: Arc<SessionManager>,
}

impl Repl {
    pub fn new(
        board: Arc<Board>,
        library: Arc<DocumentLibrary>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            board,
            library,
            sessions,
        }
    }

    /// Read commands from stdin until EOF or `quit`.
    pub async fn run(&self) -> std::io::Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let mut lines = reader.lines();

        eprint!("> ");
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                eprint!("> ");
                continue;
            }
            let step = match Command::parse(&line) {
                Ok(command) => self.execute(command).await,
                Err(e) => Step::Output(e),
            };
            match step {
                Step::Output(text) => println!("{text}"),
                Step::Quit => break,
            }
            if let Some(banner) = self.banner().await {
                eprintln!("⚠️  {banner}  (dismiss to clear)");
            }
            eprint!("> ");
        }
        Ok(())
    }

    async fn banner(&self) -> Option<String> {
        match self.board.error().await {
            Some(e) => Some(e),
            None => self.library.error().await,
        }
    }

    pub async fn execute(&self, command: Command) -> Step {
        match command {
            Command::Help => return Step::Output(HELP.into()),
            Command::Quit => return Step::Quit,
            _ => {}
        }
        let route = match command {
            Command::Docs | Command::Doc { .. } => Route::Documents,
            _ => Route::Board,
        };
        if self.sessions.navigate(route) == Route::Login {
            return Step::Output("Not signed in.".into());
        }
        if command == Command::Logout {
            if let Err(e) = self.sessions.sign_out().await {
                eprintln!("{e}");
            }
            return Step::Quit;
        }
        match self.run_command(command).await {
            Ok(text) => Step::Output(text),
            Err(e) => Step::Output(format!("error: {e}")),
        }
    }

    async fn run_command(&self, command: Command) -> Result<String, String> {
        let snapshot = self.board.snapshot().await;
        let me = self.sessions.current().map(|s| s.user_id);

        match command {
            Command::List { status } => {
                let filter = TaskFilter {
                    status,
                    ..TaskFilter::default()
                };
                Ok(render_nodes(&filter.apply(&snapshot.tasks), &snapshot))
            }
            Command::Mine => {
                let filter = TaskFilter {
                    assignee: me,
                    ..TaskFilter::default()
                };
                Ok(render_nodes(&filter.apply(&snapshot.tasks), &snapshot))
            }
            Command::Ai => {
                let agent = snapshot
                    .users
                    .iter()
                    .find(|u| u.is_ai)
                    .ok_or("no agent user")?;
                let filter = TaskFilter {
                    assignee: Some(agent.id),
                    ..TaskFilter::default()
                };
                Ok(render_nodes(&filter.apply(&snapshot.tasks), &snapshot))
            }
            Command::Board => Ok(render_board(&snapshot)),
            Command::Show { id } => {
                let id = resolve_task(&snapshot, &id)?;
                let node = snapshot.find(id).ok_or("task vanished")?;
                Ok(render_task(node, &snapshot))
            }
            Command::Add { title } => {
                let task = self
                    .board
                    .create_task(NewTask::new(title))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("Created {}", short(task.id)))
            }
            Command::Sub { parent, title } => {
                let parent = resolve_task(&snapshot, &parent)?;
                let task = self
                    .board
                    .create_subtask(parent, NewTask::new(title))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("Created {} under {}", short(task.id), short(parent)))
            }
            Command::Move { id, status } => {
                let id = resolve_task(&snapshot, &id)?;
                self.board
                    .set_status(id, status)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("{} → {}", short(id), status.label()))
            }
            Command::Drop { id, target } => {
                let id = resolve_task(&snapshot, &id)?;
                let over = match target.parse::<TaskStatus>() {
                    Ok(status) => status.as_str().to_string(),
                    Err(_) => resolve_task(&snapshot, &target)?.to_string(),
                };
                let intent = self
                    .board
                    .handle_drop(id, &over)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("{intent:?}"))
            }
            Command::Priority { id, priority } => {
                let id = resolve_task(&snapshot, &id)?;
                self.board
                    .set_priority(id, priority)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("{} priority {priority}", short(id)))
            }
            Command::Assign { id, user } => {
                let id = resolve_task(&snapshot, &id)?;
                let assignee = match user {
                    Some(query) => Some(
                        resolve_user(&snapshot.users, &query, me)
                            .ok_or_else(|| format!("no user matches {query}"))?
                            .clone(),
                    ),
                    None => None,
                };
                self.board
                    .set_assignee(id, assignee.as_ref().map(|u| u.id))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(match assignee {
                    Some(user) => format!("{} assigned to {}", short(id), user.name),
                    None => format!("{} unassigned", short(id)),
                })
            }
            Command::Due { id, date } => {
                let id = resolve_task(&snapshot, &id)?;
                self.board
                    .set_due_date(id, date)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(match date {
                    Some(date) => format!("{} due {date}", short(id)),
                    None => format!("{} has no due date", short(id)),
                })
            }
            Command::Remove { id } => {
                let id = resolve_task(&snapshot, &id)?;
                self.board.delete_task(id).await.map_err(|e| e.to_string())?;
                Ok(format!("Deleted {}", short(id)))
            }
            Command::Docs => Ok(render_groups(&self.library.groups().await)),
            Command::Doc { stem } => {
                let groups = self.library.groups().await;
                let group =
                    find_group(&groups, &stem).ok_or_else(|| format!("no document {stem}"))?;
                let mut out = format!("{}\n", group.stem);
                for doc in &group.documents {
                    let _ = writeln!(
                        out,
                        "  {:<8} {:>9}  {}",
                        doc.format().label(),
                        format_file_size(doc.file_size),
                        self.library.public_url(doc)
                    );
                }
                Ok(out.trim_end().to_string())
            }
            Command::Refresh => {
                let (tasks, docs) = futures::join!(self.board.refresh(), self.library.refresh());
                tasks.map_err(|e| e.to_string())?;
                docs.map_err(|e| e.to_string())?;
                Ok(format!("{} tasks", tree::count(&self.board.snapshot().await.tasks)))
            }
            Command::Dismiss => {
                self.board.dismiss_error().await;
                self.library.dismiss_error().await;
                Ok("Dismissed.".into())
            }
            Command::WhoAmI => {
                let session = self.sessions.require().map_err(|e| e.to_string())?;
                let name = find_user(&snapshot.users, session.user_id)
                    .map_or("unknown user".to_string(), |u| u.name.clone());
                Ok(format!(
                    "{name} <{}>",
                    session.email.as_deref().unwrap_or("no email")
                ))
            }
            Command::Help | Command::Quit | Command::Logout => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::BoardConfig;
    use crate::documents::Upload;
    use crate::store::MemoryBackend;
    use crate::store::memory::Call;

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse("ls").unwrap(), Command::List { status: None });
        assert_eq!(
            Command::parse("ls in_progress").unwrap(),
            Command::List {
                status: Some(TaskStatus::InProgress)
            }
        );
        assert_eq!(
            Command::parse("sub ab12 Draft the outline").unwrap(),
            Command::Sub {
                parent: "ab12".into(),
                title: "Draft the outline".into()
            }
        );
        assert_eq!(
            Command::parse("assign ab12 none").unwrap(),
            Command::Assign {
                id: "ab12".into(),
                user: None
            }
        );
        assert_eq!(
            Command::parse("due ab12 2026-12-24").unwrap(),
            Command::Due {
                id: "ab12".into(),
                date: NaiveDate::from_ymd_opt(2026, 12, 24)
            }
        );
        assert_eq!(Command::parse("  QUIT ").unwrap(), Command::Quit);
    }

    #[test]
    fn parse_errors() {
        assert!(Command::parse("mv ab12 doing").is_err());
        assert!(Command::parse("prio ab12").is_err());
        assert!(Command::parse("due ab12 tomorrow").is_err());
        assert!(Command::parse("show").is_err());
        assert!(Command::parse("frobnicate").unwrap_err().contains("unknown command"));
    }

    async fn signed_in() -> (Arc<MemoryBackend>, Repl, Uuid) {
        let backend = Arc::new(MemoryBackend::new());
        let me = backend.add_account("ada@example.com", "pw", "Ada Lovelace", false).await;
        backend.add_account("agent@example.com", "pw", "Hex", true).await;
        backend
            .seed_tasks(vec![
                NewTask::new("Write report")
                    .with_status(TaskStatus::Todo)
                    .with_assignee(me.id)
                    .into_task(Uuid::from_u128(0xaaaa << 112), Utc::now()),
                NewTask::new("Outline")
                    .with_parent(Uuid::from_u128(0xaaaa << 112))
                    .into_task(Uuid::from_u128(0xbbbb << 112), Utc::now()),
            ])
            .await;

        let sessions = Arc::new(SessionManager::new(backend.clone()));
        sessions.sign_in("ada@example.com", "pw").await.unwrap();
        let board = Board::new(backend.clone(), BoardConfig::default());
        board.load().await.unwrap();
        let library = DocumentLibrary::new(backend.clone());
        library.refresh().await.unwrap();
        backend.clear_calls().await;
        (backend, Repl::new(board, library, sessions), me.id)
    }

    fn output(step: Step) -> String {
        match step {
            Step::Output(text) => text,
            Step::Quit => panic!("unexpected quit"),
        }
    }

    #[tokio::test]
    async fn signed_out_commands_are_redirected() {
        let backend = Arc::new(MemoryBackend::new());
        let repl = Repl::new(
            Board::new(backend.clone(), BoardConfig::default()),
            DocumentLibrary::new(backend.clone()),
            Arc::new(SessionManager::new(backend)),
        );
        assert_eq!(output(repl.execute(Command::Board).await), "Not signed in.");
        assert_eq!(output(repl.execute(Command::Docs).await), "Not signed in.");
        assert!(output(repl.execute(Command::Help).await).contains("Commands:"));
    }

    #[tokio::test]
    async fn list_and_show_use_prefixes() {
        let (_backend, repl, _) = signed_in().await;
        let listing = output(repl.execute(Command::List { status: None }).await);
        assert!(listing.contains("Write report"));
        assert!(listing.contains("└ "));
        assert!(listing.contains("@AL"));

        let details = output(repl.execute(Command::Show { id: "aaaa".into() }).await);
        assert!(details.contains("status:   To Do"));
        assert!(details.contains("Outline"));

        let board = output(repl.execute(Command::Board).await);
        assert!(board.contains("To Do (1)"));
        assert!(board.contains("[0/1]"));
    }

    #[tokio::test]
    async fn drop_on_column_moves_task() {
        let (backend, repl, _) = signed_in().await;
        let out = output(
            repl.execute(Command::Drop {
                id: "aaaa".into(),
                target: "done".into(),
            })
            .await,
        );
        assert!(out.contains("ChangeStatus"));
        let calls = backend.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::UpdateTask { .. }));
    }

    #[tokio::test]
    async fn assign_resolves_users() {
        let (_backend, repl, _) = signed_in().await;
        let out = output(
            repl.execute(Command::Assign {
                id: "bbbb".into(),
                user: Some("ai".into()),
            })
            .await,
        );
        assert_eq!(out, "bbbb0000 assigned to Hex");
        let ai = output(repl.execute(Command::Ai).await);
        assert!(ai.contains("Write report"));

        let mine = output(repl.execute(Command::Mine).await);
        assert!(mine.contains("Write report"));
        let whoami = output(repl.execute(Command::WhoAmI).await);
        assert_eq!(whoami, "Ada Lovelace <ada@example.com>");
    }

    #[tokio::test]
    async fn unknown_prefix_is_reported() {
        let (backend, repl, _) = signed_in().await;
        let out = output(repl.execute(Command::Remove { id: "ffff".into() }).await);
        assert!(out.starts_with("error: no task matches"));
        assert!(backend.calls().await.is_empty());
    }

    #[tokio::test]
    async fn docs_list_groups() {
        let (_backend, repl, me) = signed_in().await;
        for name in ["Roadmap.md", "Roadmap.pdf"] {
            repl.library
                .upload(me, Upload::new(name, b"x".to_vec()))
                .await
                .unwrap();
        }
        let docs = output(repl.execute(Command::Docs).await);
        assert!(docs.contains("Roadmap  [pdf, md]"));
        let doc = output(repl.execute(Command::Doc { stem: "roadmap".into() }).await);
        assert!(doc.contains("PDF"));
        assert!(doc.contains("memory:///storage/v1/object/public/documents/"));
    }

    #[tokio::test]
    async fn logout_quits() {
        let (backend, repl, _) = signed_in().await;
        assert_eq!(repl.execute(Command::Logout).await, Step::Quit);
        assert!(backend.signed_in_user().await.is_none());
        assert_eq!(output(repl.execute(Command::Board).await), "Not signed in.");
    }
}

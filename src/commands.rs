//! Slash commands understood by the bot

use teloxide::utils::command::BotCommands;

/// Telegram bot commands. Administrator commands are hidden from the menu.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команды RUУчебника:")]
pub enum Command {
    #[command(description = "начать работу с ботом")]
    Start,
    #[command(description = "справка по использованию")]
    Help,
    #[command(description = "о боте")]
    About,
    #[command(description = "выбрать учебник по классу и предмету")]
    Search,
    #[command(description = "каталог учебников")]
    Textbooks,
    #[command(description = "найти учебник по названию или автору")]
    Find(String),
    #[command(hide)]
    Cancel,
    #[command(hide)]
    Stats,
    #[command(hide)]
    Users,
    #[command(hide)]
    Broadcast(String),
    #[command(hide)]
    Ban(String),
    #[command(hide)]
    Unban(String),
    #[command(hide)]
    Logs,
}

impl Command {
    /// Commands restricted to the configured administrator
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Command::Stats
                | Command::Users
                | Command::Broadcast(_)
                | Command::Ban(_)
                | Command::Unban(_)
                | Command::Logs
        )
    }

    /// Name used in log fields
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::About => "about",
            Command::Search => "search",
            Command::Textbooks => "textbooks",
            Command::Find(_) => "find",
            Command::Cancel => "cancel",
            Command::Stats => "stats",
            Command::Users => "users",
            Command::Broadcast(_) => "broadcast",
            Command::Ban(_) => "ban",
            Command::Unban(_) => "unban",
            Command::Logs => "logs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start", "ruuchebnik_bot").unwrap(), Command::Start);
        assert_eq!(
            Command::parse("/find алгебра Мордкович", "ruuchebnik_bot").unwrap(),
            Command::Find("алгебра Мордкович".to_string())
        );
        assert_eq!(
            Command::parse("/ban 123 spam 7", "ruuchebnik_bot").unwrap(),
            Command::Ban("123 spam 7".to_string())
        );
        assert!(Command::parse("/unknown", "ruuchebnik_bot").is_err());
    }

    #[test]
    fn test_admin_commands_hidden_from_menu() {
        let visible: Vec<String> = Command::bot_commands()
            .into_iter()
            .map(|c| c.command.trim_start_matches('/').to_string())
            .collect();
        assert!(visible.iter().any(|c| c == "start"));
        assert!(!visible.iter().any(|c| c == "ban"));
        assert!(Command::Stats.is_admin());
        assert!(!Command::Help.is_admin());
    }
}

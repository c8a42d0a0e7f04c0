//! FHIR Desk命令行程序

mod output;
mod seed;
mod setup;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fhirdesk_admin::{init_logging, AuthMode, ConfigManager, DeskConfig};
use fhirdesk_client::{
    FhirDesk, ObservationEdit, ObservationForm, PatientEdit, PatientForm, ResourceList, SubmissionReport,
    SubmissionStatus,
};
use fhirdesk_core::utils::generate_identifier;
use fhirdesk_core::{FhirResource, ListQuery, Searchable};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// FHIR Desk命令行参数
#[derive(Parser, Debug)]
#[command(name = "fhirdesk")]
#[command(about = "FHIR患者与观察记录管理客户端")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "fhirdesk.toml")]
    config: PathBuf,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// FHIR API根地址，覆盖配置文件
    #[arg(long)]
    base_url: Option<String>,

    /// 使用预先签发的令牌
    #[arg(long)]
    token: Option<String>,

    /// 以JSON输出资源
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 患者
    #[command(subcommand)]
    Patients(PatientCommand),
    /// 观察记录
    #[command(subcommand)]
    Observations(ObservationCommand),
    /// 登录与登出
    #[command(subcommand)]
    Auth(AuthCommand),
    /// 批量创建随机演示患者
    Seed {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// 配置
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
struct ListArgs {
    /// 每页条数
    #[arg(long)]
    count: Option<u32>,
    /// 起始偏移量
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    offset: i64,
    /// 过滤属性
    #[arg(long)]
    filter: Option<String>,
    /// 过滤文本（子串匹配，不区分大小写）
    #[arg(long)]
    search: Option<String>,
    /// 排序属性
    #[arg(long)]
    sort: Option<String>,
}

#[derive(Subcommand, Debug)]
enum PatientCommand {
    List(ListArgs),
    Show {
        id: String,
    },
    Create(CreatePatientArgs),
    Edit {
        id: String,
        #[arg(long)]
        given: Option<String>,
        #[arg(long)]
        family: Option<String>,
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// 新照片；保留原照片的附件ID
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug)]
struct CreatePatientArgs {
    /// 业务标识符，缺省时自动生成
    #[arg(long)]
    identifier: Option<String>,
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long, default_value = "")]
    given: String,
    #[arg(long, default_value = "")]
    family: String,
    /// male / female / other / unknown
    #[arg(long, default_value = "")]
    gender: String,
    /// YYYY、YYYY-MM 或 YYYY-MM-DD
    #[arg(long, default_value = "")]
    birth_date: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    street: String,
    #[arg(long, default_value = "")]
    city: String,
    #[arg(long, default_value = "")]
    state: String,
    #[arg(long, default_value = "")]
    postal_code: String,
    #[arg(long, default_value = "")]
    country: String,
    #[arg(long, default_value = "")]
    marital_status_code: String,
    #[arg(long, default_value = "")]
    marital_status_display: String,
    #[arg(long, default_value = "")]
    language_code: String,
    #[arg(long, default_value = "")]
    language_display: String,
    #[arg(long)]
    inactive: bool,
    #[arg(long)]
    photo: Option<PathBuf>,
}

impl From<CreatePatientArgs> for PatientForm {
    fn from(args: CreatePatientArgs) -> Self {
        PatientForm {
            identifier: args.identifier.unwrap_or_else(generate_identifier),
            title: args.title,
            given: args.given,
            family: args.family,
            gender: args.gender,
            birth_date: args.birth_date,
            phone: args.phone,
            email: args.email,
            street: args.street,
            city: args.city,
            state: args.state,
            postal_code: args.postal_code,
            country: args.country,
            marital_status_code: args.marital_status_code,
            marital_status_display: args.marital_status_display,
            language_code: args.language_code,
            language_display: args.language_display,
            active: !args.inactive,
            photo: args.photo,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ObservationCommand {
    List {
        /// 只列出该患者的观察记录
        #[arg(long)]
        patient: Option<String>,
        #[command(flatten)]
        list: ListArgs,
    },
    Show {
        id: String,
        /// 把解析到的媒体附件写入该目录
        #[arg(long)]
        save_media: Option<PathBuf>,
    },
    Create(CreateObservationArgs),
    Edit {
        id: String,
        #[arg(long)]
        identifier: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// 生效时间
        #[arg(long)]
        effective: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug)]
struct CreateObservationArgs {
    /// 所属患者ID
    #[arg(long)]
    patient: String,
    #[arg(long, default_value = "")]
    identifier: String,
    /// registered / preliminary / final
    #[arg(long, default_value = "preliminary")]
    status: String,
    #[arg(long, default_value = "")]
    category: String,
    /// LOINC编码
    #[arg(long, default_value = "")]
    loinc: String,
    /// 签发时间，缺省为当前时间
    #[arg(long, default_value = "")]
    issued: String,
    #[arg(long, default_value = "")]
    body_site: String,
    #[arg(long, default_value = "")]
    performer: String,
    #[arg(long, allow_hyphen_values = true)]
    low: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    high: Option<f64>,
    #[arg(long, default_value = "")]
    unit: String,
    #[arg(long, default_value = "")]
    interpretation: String,
    #[arg(long, default_value = "")]
    note: String,
    #[arg(long, default_value = "image")]
    media_type: String,
    #[arg(long, default_value = "completed")]
    media_status: String,
    /// 附件文件，可重复
    #[arg(long = "file")]
    files: Vec<PathBuf>,
}

impl From<CreateObservationArgs> for ObservationForm {
    fn from(args: CreateObservationArgs) -> Self {
        ObservationForm {
            identifier: args.identifier,
            status: args.status,
            category: args.category,
            loinc: args.loinc,
            issued: args.issued,
            body_site: args.body_site,
            performer: args.performer,
            low: args.low,
            high: args.high,
            unit: args.unit,
            interpretation: args.interpretation,
            note: args.note,
            media_type: args.media_type,
            media_status: args.media_status,
            files: args.files,
        }
    }
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// 打印登录跳转地址
    LoginUrl {
        #[arg(long)]
        state: Option<String>,
    },
    /// 打印登出跳转地址
    LogoutUrl,
    /// 获取并打印当前令牌
    Token,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// 打印生效的配置
    Show,
    /// 写出默认配置文件
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::new(&cli.config)?;
    let mut config = manager.get_config().await;
    apply_overrides(&mut config, &cli);

    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level))?;
    info!("Using FHIR API at {}", config.server.base_url);

    if let Err(e) = run(cli, config, manager).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn apply_overrides(config: &mut DeskConfig, cli: &Cli) {
    if let Some(base_url) = &cli.base_url {
        config.server.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        config.auth.mode = AuthMode::Token;
        config.auth.token = Some(token.clone());
    }
}

async fn run(cli: Cli, config: DeskConfig, manager: ConfigManager) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Command::Config(command) => run_config(command, &config, &manager).await,
        Command::Auth(command) => run_auth(command, &config).await,
        Command::Seed { count } => {
            let desk = setup::build_desk(&config)?;
            let created = seed::seed_patients(&desk, count).await?;
            println!("created {}/{} patients", created, count);
            Ok(())
        }
        Command::Patients(command) => {
            let desk = setup::build_desk(&config)?;
            run_patients(command, &desk, &config, json).await
        }
        Command::Observations(command) => {
            let desk = setup::build_desk(&config)?;
            run_observations(command, &desk, &config, json).await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 应用命令行给出的过滤与排序参数
fn apply_list_args<T: FhirResource + Searchable>(list: &mut ResourceList<T>, args: &ListArgs) {
    let current = list.query().clone();
    let query = ListQuery {
        filter_attribute: args.filter.clone().unwrap_or(current.filter_attribute),
        search_text: args.search.clone().unwrap_or(current.search_text),
        sort_attribute: args.sort.clone().unwrap_or(current.sort_attribute),
    };
    list.set_query(query);
}

async fn load_list<T: FhirResource + Searchable>(mut list: ResourceList<T>, args: &ListArgs) -> Result<Vec<T>> {
    apply_list_args(&mut list, args);
    if !list.refresh().await {
        anyhow::bail!("Failed to load {} list", T::KIND);
    }
    Ok(list.visible())
}

/// 打印提交结果；失败时返回错误以便设置退出码
fn report_submission<T: FhirResource>(report: &SubmissionReport<T>, json: bool) -> Result<()> {
    match report.status() {
        SubmissionStatus::Success => {
            if let Some(resource) = &report.resource {
                if json {
                    print_json(resource)?;
                } else {
                    println!(
                        "{} {} saved (id {}, {} media)",
                        T::KIND,
                        resource.identifier_value().unwrap_or("-"),
                        resource.id().unwrap_or("-"),
                        report.media.len()
                    );
                }
            }
            Ok(())
        }
        SubmissionStatus::Failure => {
            anyhow::bail!("{} submission failed: {}", T::KIND, report.errors.join("; "))
        }
    }
}

async fn run_patients(command: PatientCommand, desk: &FhirDesk, config: &DeskConfig, json: bool) -> Result<()> {
    match command {
        PatientCommand::List(args) => {
            let page = setup::page_request(config, args.count, args.offset);
            let patients = load_list(desk.patients(page), &args).await?;
            if json {
                print_json(&patients)
            } else {
                print!("{}", output::patient_table(&patients));
                Ok(())
            }
        }
        PatientCommand::Show { id } => {
            let patient = desk.patient(&id).await?;
            if json {
                print_json(&patient)
            } else {
                print!("{}", output::patient_details(&patient));
                Ok(())
            }
        }
        PatientCommand::Create(args) => {
            let report = desk.create_patient(args.into()).await?;
            report_submission(&report, json)
        }
        PatientCommand::Edit {
            id,
            given,
            family,
            birth_date,
            phone,
            email,
            photo,
        } => {
            let edit = PatientEdit {
                given,
                family,
                birth_date,
                phone,
                email,
                photo,
            };
            let report = desk.edit_patient(&id, edit).await?;
            report_submission(&report, json)
        }
        PatientCommand::Delete { id } => {
            desk.delete_patient(&id).await?;
            println!("Patient {} deleted", id);
            Ok(())
        }
    }
}

async fn run_observations(
    command: ObservationCommand,
    desk: &FhirDesk,
    config: &DeskConfig,
    json: bool,
) -> Result<()> {
    match command {
        ObservationCommand::List { patient, list } => {
            let page = setup::page_request(config, list.count, list.offset);
            let view = match &patient {
                Some(patient_id) => desk.patient_observations(patient_id, page),
                None => desk.observations(page),
            };
            let observations = load_list(view, &list).await?;
            if json {
                print_json(&observations)
            } else {
                print!("{}", output::observation_table(&observations));
                Ok(())
            }
        }
        ObservationCommand::Show { id, save_media } => {
            let details = desk.observation_details(&id).await?;
            if json {
                print_json(&details.observation)?;
                print_json(&details.media)?;
            } else {
                print!("{}", output::observation_details(&details));
            }
            if let Some(dir) = save_media {
                save_media_files(desk, &details.media, &dir).await?;
            }
            Ok(())
        }
        ObservationCommand::Create(args) => {
            let patient_id = args.patient.clone();
            let report = desk.create_observation(&patient_id, args.into()).await?;
            report_submission(&report, json)
        }
        ObservationCommand::Edit {
            id,
            identifier,
            status,
            category,
            effective,
        } => {
            let edit = ObservationEdit {
                identifier,
                status,
                category,
                effective_date_time: effective,
            };
            let report = desk.edit_observation(&id, edit).await?;
            report_submission(&report, json)
        }
        ObservationCommand::Delete { id } => {
            let outcome = desk.delete_observation(&id).await?;
            println!(
                "Observation {} deleted ({} media deleted, {} failed)",
                id, outcome.media.deleted, outcome.media.failed
            );
            Ok(())
        }
    }
}

fn media_file_name(media: &fhirdesk_core::Media, index: usize) -> String {
    let stem = media
        .identifier_value()
        .or(media.id())
        .map(str::to_string)
        .unwrap_or_else(|| format!("media-{}", index));
    let extension = media
        .content
        .content_type
        .as_deref()
        .and_then(|ct| ct.split('/').nth(1))
        .unwrap_or("bin");
    format!("{}.{}", stem, extension)
}

async fn save_media_files(desk: &FhirDesk, media: &[fhirdesk_core::Media], dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    for (index, item) in media.iter().enumerate() {
        let bytes = desk.attachment_bytes(&item.content).await?;
        let path = dir.join(media_file_name(item, index));
        tokio::fs::write(&path, bytes.as_slice())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}

async fn run_auth(command: AuthCommand, config: &DeskConfig) -> Result<()> {
    match command {
        AuthCommand::LoginUrl { state } => {
            let provider = setup::identity_provider(&config.auth)?;
            let state = state.unwrap_or_else(generate_identifier);
            println!("{}", provider.login_url(&state)?);
        }
        AuthCommand::LogoutUrl => {
            let provider = setup::identity_provider(&config.auth)?;
            println!("{}", provider.logout_url()?);
        }
        AuthCommand::Token => {
            let desk = setup::build_desk(config)?;
            match desk.bearer_token().await? {
                Some(token) => println!("{}", token),
                None => anyhow::bail!("Not authenticated: auth.mode is anonymous"),
            }
        }
    }
    Ok(())
}

async fn run_config(command: ConfigCommand, config: &DeskConfig, manager: &ConfigManager) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let mut shown = config.clone();
            if shown.auth.token.is_some() {
                shown.auth.token = Some("***".to_string());
            }
            if shown.auth.client_secret.is_some() {
                shown.auth.client_secret = Some("***".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigCommand::Init { force } => {
            let path = manager.config_path();
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            manager.update_config(DeskConfig::default()).await?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_observation_create() {
        let cli = Cli::try_parse_from([
            "fhirdesk",
            "observations",
            "create",
            "--patient",
            "7",
            "--loinc",
            "1234-5",
            "--low",
            "-1.5",
            "--file",
            "a.png",
            "--file",
            "b.png",
        ])
        .unwrap();

        let Command::Observations(ObservationCommand::Create(args)) = cli.command else {
            panic!("unexpected command");
        };
        let form: ObservationForm = args.into();
        assert_eq!(form.status, "preliminary");
        assert_eq!(form.low, Some(-1.5));
        assert_eq!(form.files.len(), 2);
    }

    #[test]
    fn test_patient_create_generates_identifier() {
        let cli = Cli::try_parse_from(["fhirdesk", "patients", "create", "--given", "Anna"]).unwrap();
        let Command::Patients(PatientCommand::Create(args)) = cli.command else {
            panic!("unexpected command");
        };
        let form: PatientForm = args.into();
        assert!(!form.identifier.is_empty());
        assert!(form.active);
    }

    #[test]
    fn test_token_flag_switches_auth_mode() {
        let cli = Cli::try_parse_from(["fhirdesk", "--token", "abc", "config", "show"]).unwrap();
        let mut config = DeskConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.auth.mode, AuthMode::Token);
        assert_eq!(config.auth.token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_media_file_name() {
        let mut media = fhirdesk_core::Media::default();
        media.identifier = vec![fhirdesk_core::Identifier::new("m-1")];
        media.content.content_type = Some("image/png".to_string());
        assert_eq!(media_file_name(&media, 0), "m-1.png");
        assert_eq!(media_file_name(&fhirdesk_core::Media::default(), 3), "media-3.bin");
    }
}

//! Stack file parser and static validation
//!
//! Everything here runs before any process is started: parse errors, unknown
//! dependencies, host-port collisions and healthy-edge cycles are all
//! rejected up front.

use super::config::{
    merge_env, parse_duration, DependsCondition, DependsOnConfig, Dependency, HealthCheck,
    PortBinding, PortConfig, Protocol, ServiceSpec, Stack, StackFile, VolumeBinding, VolumeKind,
    VolumeMountConfig,
};
use crate::error::{BosunError, Result};
use crate::health;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Default stack file names, probed in order
pub const DEFAULT_STACK_FILES: &[&str] = &["bosun.yaml", "bosun.yml", "stack.yaml", "stack.yml"];

/// Stack file parser
pub struct StackParser;

impl StackParser {
    /// Find a stack file in a directory
    pub fn find_stack_file(dir: &Path) -> Option<std::path::PathBuf> {
        for name in DEFAULT_STACK_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Parse a stack file from a path
    pub fn parse_file(path: &Path) -> Result<StackFile> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BosunError::StackParse(format!("Failed to read file: {}", e)))?;

        Self::parse_str(&content)
    }

    /// Parse a stack file from a string
    pub fn parse_str(content: &str) -> Result<StackFile> {
        serde_yaml::from_str(content)
            .map_err(|e| BosunError::StackParse(format!("Failed to parse YAML: {}", e)))
    }

    /// Interpolate `${VAR}`, `$VAR` and `${VAR:-default}` in the fields
    /// that commonly carry configuration: image, shell commands and
    /// environment values.
    pub fn interpolate(file: &mut StackFile, env: &HashMap<String, String>) {
        use super::config::{CommandConfig, EnvironmentConfig};

        let interpolate_env = |config: &mut EnvironmentConfig| match config {
            EnvironmentConfig::Map(map) => {
                for value in map.values_mut() {
                    if let Some(v) = value {
                        *v = interpolate_string(v, env);
                    }
                }
            }
            EnvironmentConfig::Array(arr) => {
                for item in arr.iter_mut() {
                    *item = interpolate_string(item, env);
                }
            }
        };

        if let Some(ref mut defaults) = file.environment {
            interpolate_env(defaults);
        }

        for service in file.services.values_mut() {
            if let Some(ref mut image) = service.image {
                *image = interpolate_string(image, env);
            }
            if let Some(CommandConfig::Shell(ref mut s)) = service.command {
                *s = interpolate_string(s, env);
            }
            if let Some(ref mut environment) = service.environment {
                interpolate_env(environment);
            }
        }
    }

    /// Resolve a raw stack file into the validated [`Stack`] model.
    pub fn resolve(file: StackFile, default_name: &str) -> Result<Stack> {
        let stack_name = file.name.clone().unwrap_or_else(|| default_name.to_string());
        let network = file
            .network
            .clone()
            .unwrap_or_else(|| format!("{}_default", stack_name));

        let defaults = file
            .environment
            .as_ref()
            .map(|e| e.to_map())
            .unwrap_or_default();

        // Named volume key -> resolved volume name
        let mut volume_names: HashMap<String, String> = HashMap::new();
        for (key, cfg) in &file.volumes {
            let resolved = cfg
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", stack_name, key));
            volume_names.insert(key.clone(), resolved);
        }

        let mut services = Vec::with_capacity(file.services.len());
        for (name, cfg) in &file.services {
            let command = cfg
                .command
                .as_ref()
                .map(|c| c.to_argv())
                .ok_or_else(|| {
                    BosunError::InvalidConfig(format!("Service '{}' has no command", name))
                })?;

            let environment = merge_env(
                &defaults,
                &cfg.environment
                    .as_ref()
                    .map(|e| e.to_map())
                    .unwrap_or_default(),
            );

            let mut ports = Vec::new();
            for port in cfg.ports.iter().flatten() {
                ports.push(resolve_port(name, port)?);
            }

            let mut volumes = Vec::new();
            for mount in cfg.volumes.iter().flatten() {
                volumes.push(resolve_volume(name, mount, &volume_names)?);
            }

            let depends_on = resolve_depends_on(name, cfg.depends_on.as_ref())?;
            let health_check = resolve_healthcheck(name, cfg.healthcheck.as_ref())?;

            let stop_grace = cfg
                .stop_grace_period
                .as_deref()
                .map(parse_duration)
                .transpose()?;

            services.push(ServiceSpec {
                name: name.clone(),
                profile: cfg.profile.clone(),
                image: cfg.image.clone(),
                command,
                working_dir: cfg.working_dir.clone(),
                environment,
                ports,
                volumes,
                depends_on,
                health_check,
                stop_grace,
            });
        }

        let stack = Stack {
            name: stack_name,
            services,
            volumes: volume_names.into_values().collect(),
            network,
        };

        Self::validate(&stack)?;
        Ok(stack)
    }

    /// Static validation: unknown dependencies, host-port collisions, and
    /// cycles among healthy-condition edges.
    pub fn validate(stack: &Stack) -> Result<()> {
        let names: HashSet<&str> = stack.services.iter().map(|s| s.name.as_str()).collect();

        for service in &stack.services {
            for dep in &service.depends_on {
                if !names.contains(dep.service.as_str()) {
                    return Err(BosunError::UnknownDependency {
                        service: service.name.clone(),
                        dependency: dep.service.clone(),
                    });
                }
                if dep.service == service.name {
                    return Err(BosunError::CycleDetected(vec![service.name.clone()]));
                }
            }
        }

        let mut bound: HashMap<u16, &str> = HashMap::new();
        for service in &stack.services {
            for port in &service.ports {
                if let Some(first) = bound.insert(port.host_port, service.name.as_str()) {
                    if first != service.name {
                        return Err(BosunError::PortCollision {
                            port: port.host_port,
                            first: first.to_string(),
                            second: service.name.clone(),
                        });
                    }
                }
            }
        }

        check_healthy_cycles(stack)?;
        Ok(())
    }
}

/// Reject cycles among healthy-condition edges. A cycle here makes the
/// stack unstartable, so it fails validation rather than surfacing at
/// runtime.
fn check_healthy_cycles(stack: &Stack) -> Result<()> {
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();

    for service in &stack.services {
        visit_healthy(stack, &service.name, &mut visited, &mut visiting)?;
    }
    Ok(())
}

fn visit_healthy(
    stack: &Stack,
    name: &str,
    visited: &mut HashSet<String>,
    visiting: &mut Vec<String>,
) -> Result<()> {
    if visited.contains(name) {
        return Ok(());
    }
    if let Some(pos) = visiting.iter().position(|n| n == name) {
        return Err(BosunError::CycleDetected(visiting[pos..].to_vec()));
    }

    visiting.push(name.to_string());
    if let Some(service) = stack.service(name) {
        for dep in service.healthy_deps() {
            visit_healthy(stack, &dep.service, visited, visiting)?;
        }
    }
    visiting.pop();
    visited.insert(name.to_string());
    Ok(())
}

fn resolve_port(service: &str, port: &PortConfig) -> Result<PortBinding> {
    match port {
        PortConfig::Short(s) => {
            let (spec, proto) = match s.split_once('/') {
                Some((spec, proto)) => (spec, proto),
                None => (s.as_str(), "tcp"),
            };
            let (host, container) = spec.split_once(':').ok_or_else(|| {
                BosunError::InvalidConfig(format!(
                    "Service '{}': port '{}' must be host:container",
                    service, s
                ))
            })?;
            Ok(PortBinding {
                host_port: parse_port(service, host)?,
                container_port: parse_port(service, container)?,
                protocol: parse_protocol(service, proto)?,
            })
        }
        PortConfig::Long(long) => Ok(PortBinding {
            host_port: long.published.unwrap_or(long.target),
            container_port: long.target,
            protocol: parse_protocol(service, long.protocol.as_deref().unwrap_or("tcp"))?,
        }),
    }
}

fn parse_port(service: &str, s: &str) -> Result<u16> {
    s.trim().parse().map_err(|_| {
        BosunError::InvalidConfig(format!("Service '{}': invalid port '{}'", service, s))
    })
}

fn parse_protocol(service: &str, s: &str) -> Result<Protocol> {
    match s {
        "tcp" => Ok(Protocol::Tcp),
        "udp" => Ok(Protocol::Udp),
        other => Err(BosunError::InvalidConfig(format!(
            "Service '{}': unknown protocol '{}'",
            service, other
        ))),
    }
}

fn resolve_volume(
    service: &str,
    mount: &VolumeMountConfig,
    volume_names: &HashMap<String, String>,
) -> Result<VolumeBinding> {
    let (source, target, read_only, declared_kind) = match mount {
        VolumeMountConfig::Short(s) => {
            let parts: Vec<&str> = s.split(':').collect();
            match parts.as_slice() {
                [source, target] => (source.to_string(), target.to_string(), false, None),
                [source, target, mode] => {
                    let ro = match *mode {
                        "ro" => true,
                        "rw" => false,
                        other => {
                            return Err(BosunError::InvalidConfig(format!(
                                "Service '{}': unknown volume mode '{}'",
                                service, other
                            )))
                        }
                    };
                    (source.to_string(), target.to_string(), ro, None)
                }
                _ => {
                    return Err(BosunError::InvalidConfig(format!(
                        "Service '{}': volume '{}' must be source:target[:mode]",
                        service, s
                    )))
                }
            }
        }
        VolumeMountConfig::Long(long) => (
            long.source.clone(),
            long.target.clone(),
            long.read_only.unwrap_or(false),
            long.mount_type.clone(),
        ),
    };

    let kind = match declared_kind.as_deref() {
        Some("bind") => VolumeKind::Bind,
        Some("volume") => VolumeKind::Named,
        Some(other) => {
            return Err(BosunError::InvalidConfig(format!(
                "Service '{}': unknown mount type '{}'",
                service, other
            )))
        }
        // Path-looking sources are bind mirrors, everything else is named.
        None if source.starts_with('/') || source.starts_with('.') => VolumeKind::Bind,
        None => VolumeKind::Named,
    };

    let source = if kind == VolumeKind::Named {
        volume_names.get(&source).cloned().unwrap_or(source)
    } else {
        source
    };

    Ok(VolumeBinding {
        source,
        target,
        kind,
        read_only,
    })
}

fn resolve_depends_on(
    service: &str,
    depends: Option<&DependsOnConfig>,
) -> Result<Vec<Dependency>> {
    let mut out = Vec::new();
    match depends {
        None => {}
        Some(DependsOnConfig::Array(arr)) => {
            for name in arr {
                out.push(Dependency {
                    service: name.clone(),
                    condition: DependsCondition::Started,
                });
            }
        }
        Some(DependsOnConfig::Map(map)) => {
            for (name, entry) in map {
                let condition = match entry.condition.as_str() {
                    "service_started" | "started" => DependsCondition::Started,
                    "service_healthy" | "healthy" => DependsCondition::Healthy,
                    other => {
                        return Err(BosunError::InvalidConfig(format!(
                            "Service '{}': unknown depends_on condition '{}'",
                            service, other
                        )))
                    }
                };
                out.push(Dependency {
                    service: name.clone(),
                    condition,
                });
            }
        }
    }
    Ok(out)
}

fn resolve_healthcheck(
    service: &str,
    cfg: Option<&super::config::HealthcheckConfig>,
) -> Result<Option<HealthCheck>> {
    let Some(cfg) = cfg else { return Ok(None) };
    if cfg.disable.unwrap_or(false) {
        return Ok(None);
    }

    let test = cfg
        .test
        .as_ref()
        .map(|t| t.to_argv())
        .ok_or_else(|| {
            BosunError::InvalidConfig(format!("Service '{}': healthcheck has no test", service))
        })?;

    Ok(Some(HealthCheck {
        test,
        interval: cfg
            .interval
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(health::DEFAULT_PROBE_INTERVAL),
        timeout: cfg
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(health::DEFAULT_PROBE_TIMEOUT),
        retries: cfg.retries.unwrap_or(health::DEFAULT_PROBE_RETRIES),
        start_period: cfg
            .start_period
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(std::time::Duration::ZERO),
    }))
}

/// Interpolate environment variables in a string
fn interpolate_string(s: &str, env: &HashMap<String, String>) -> String {
    let mut result = s.to_string();

    // Handle ${VAR:-default} first so plain substitution cannot eat it
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*):-([^}]*)\}").unwrap();
    result = re
        .replace_all(&result, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = &caps[2];
            env.get(var).cloned().unwrap_or_else(|| default.to_string())
        })
        .to_string();

    // Handle ${VAR} and $VAR syntax
    for (key, value) in env {
        result = result.replace(&format!("${{{}}}", key), value);
        result = result.replace(&format!("${}", key), value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
name: shop
environment:
  LOG_LEVEL: info
services:
  db:
    command: ["postgres", "-D", "/data"]
    ports:
      - "5432:5432"
    volumes:
      - "pgdata:/var/lib/postgresql/data"
    healthcheck:
      test: ["pg_isready"]
      interval: 1s
      retries: 3
  cache:
    command: ["redis-server"]
  backend:
    command: ["api-server"]
    environment:
      LOG_LEVEL: debug
    depends_on:
      db:
        condition: service_healthy
      cache:
        condition: service_started
  frontend:
    command: ["web-server"]
    volumes:
      - "./web:/srv/web:ro"
    depends_on:
      backend:
        condition: service_healthy
volumes:
  pgdata: {}
"#;

    #[test]
    fn test_parse_and_resolve_basic() {
        let file = StackParser::parse_str(BASIC).unwrap();
        let stack = StackParser::resolve(file, "fallback").unwrap();

        assert_eq!(stack.name, "shop");
        assert_eq!(stack.network, "shop_default");
        let names: Vec<&str> = stack.services.iter().map(|s| s.name.as_str()).collect();
        // declaration order preserved
        assert_eq!(names, vec!["db", "cache", "backend", "frontend"]);

        let db = stack.service("db").unwrap();
        assert_eq!(db.ports[0].host_port, 5432);
        assert_eq!(db.volumes[0].kind, VolumeKind::Named);
        assert_eq!(db.volumes[0].source, "shop_pgdata");
        assert!(db.health_check.is_some());

        let backend = stack.service("backend").unwrap();
        assert_eq!(
            backend.environment.get("LOG_LEVEL").map(String::as_str),
            Some("debug")
        );
        assert_eq!(backend.depends_on.len(), 2);

        let frontend = stack.service("frontend").unwrap();
        assert_eq!(frontend.volumes[0].kind, VolumeKind::Bind);
        assert!(frontend.volumes[0].read_only);

        assert_eq!(stack.volumes, vec!["shop_pgdata".to_string()]);
    }

    #[test]
    fn test_missing_command_rejected() {
        let yaml = r#"
services:
  web:
    image: nginx
"#;
        let file = StackParser::parse_str(yaml).unwrap();
        let err = StackParser::resolve(file, "t").unwrap_err();
        assert!(matches!(err, BosunError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let yaml = r#"
services:
  web:
    command: ["true"]
    depends_on:
      - api
"#;
        let file = StackParser::parse_str(yaml).unwrap();
        let err = StackParser::resolve(file, "t").unwrap_err();
        assert!(matches!(err, BosunError::UnknownDependency { .. }));
    }

    #[test]
    fn test_port_collision_rejected() {
        let yaml = r#"
services:
  a:
    command: ["true"]
    ports: ["8080:80"]
  b:
    command: ["true"]
    ports: ["8080:90"]
"#;
        let file = StackParser::parse_str(yaml).unwrap();
        let err = StackParser::resolve(file, "t").unwrap_err();
        assert!(matches!(err, BosunError::PortCollision { port: 8080, .. }));
    }

    #[test]
    fn test_healthy_cycle_rejected() {
        let yaml = r#"
services:
  a:
    command: ["true"]
    depends_on:
      b:
        condition: service_healthy
  b:
    command: ["true"]
    depends_on:
      a:
        condition: service_healthy
"#;
        let file = StackParser::parse_str(yaml).unwrap();
        let err = StackParser::resolve(file, "t").unwrap_err();
        match err {
            BosunError::CycleDetected(members) => {
                assert!(members.contains(&"a".to_string()) || members.contains(&"b".to_string()));
            }
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[test]
    fn test_started_cycle_passes_validation() {
        // Only healthy-condition edges are checked here; any-edge cycles
        // still fail at ordering time.
        let yaml = r#"
services:
  a:
    command: ["true"]
    depends_on:
      - b
  b:
    command: ["true"]
    depends_on:
      - a
"#;
        let file = StackParser::parse_str(yaml).unwrap();
        assert!(StackParser::resolve(file, "t").is_ok());
    }

    #[test]
    fn test_interpolate_defaults() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.2".to_string());

        assert_eq!(interpolate_string("app:${TAG}", &env), "app:1.2");
        assert_eq!(interpolate_string("app:${VER:-latest}", &env), "app:latest");
        assert_eq!(interpolate_string("port=$TAG", &env), "port=1.2");
    }
}

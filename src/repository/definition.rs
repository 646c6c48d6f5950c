//! 模块定义与模块元数据
//!
//! 两者都在仓库扫描时创建，之后不可变。元数据只能通过
//! [`ModuleMetadataBuilder`] 构建，构建完成后没有任何修改方法。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::manifest::{Manifest, DEFAULT_VERSION};
use crate::module::version::VersionRange;
use crate::repository::descriptor::ComponentDescriptor;
use crate::utils::Result;

/// 模块标识：(名称, 版本)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleId {
    /// 模块名
    pub name: String,
    /// 版本原文
    pub version: String,
}

impl ModuleId {
    /// 创建模块标识
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// 模块依赖声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDependency {
    /// 依赖的模块名
    pub name: String,
    /// 版本范围原文；`None` 表示任意版本
    pub version_range: Option<String>,
    /// 是否可选
    pub optional: bool,
}

impl ModuleDependency {
    /// 创建必需依赖
    pub fn new(name: impl Into<String>, version_range: Option<String>) -> Self {
        Self {
            name: name.into(),
            version_range,
            optional: false,
        }
    }

    /// 解析版本范围
    pub fn range(&self) -> Result<VersionRange> {
        match &self.version_range {
            Some(text) => VersionRange::parse(text),
            None => Ok(VersionRange::any()),
        }
    }
}

/// 服务提供者文件（`META-INF/services/<contract>` 的原样内容）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceProviderFile {
    /// 条目 URI
    pub location: String,
    /// 原样内容
    pub content: String,
}

impl ServiceProviderFile {
    /// 每个非注释行一个提供者名
    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
    }
}

/// 模块元数据（只读）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleMetadata {
    /// 定位器名 -> 描述符列表
    descriptors: BTreeMap<String, Vec<ComponentDescriptor>>,
    /// 契约名 -> 服务提供者文件
    services: BTreeMap<String, Vec<ServiceProviderFile>>,
}

impl ModuleMetadata {
    /// 创建构建器
    pub fn builder() -> ModuleMetadataBuilder {
        ModuleMetadataBuilder::default()
    }

    /// 某个定位器名下的描述符
    pub fn descriptors(&self, locator: &str) -> &[ComponentDescriptor] {
        self.descriptors
            .get(locator)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 所有带描述符的定位器名
    pub fn locator_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// 某个契约的服务提供者文件
    pub fn services(&self, contract: &str) -> &[ServiceProviderFile] {
        self.services
            .get(contract)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 所有提供服务的契约名
    pub fn service_contracts(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// 是否没有任何元数据
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty() && self.services.is_empty()
    }
}

/// 模块元数据构建器
#[derive(Debug, Default)]
pub struct ModuleMetadataBuilder {
    metadata: ModuleMetadata,
}

impl ModuleMetadataBuilder {
    /// 追加某个定位器名下的描述符
    pub fn add_descriptors(
        &mut self,
        locator: impl Into<String>,
        descriptors: Vec<ComponentDescriptor>,
    ) -> &mut Self {
        self.metadata
            .descriptors
            .entry(locator.into())
            .or_default()
            .extend(descriptors);
        self
    }

    /// 追加服务提供者文件
    pub fn add_service(
        &mut self,
        contract: impl Into<String>,
        location: impl Into<String>,
        content: impl Into<String>,
    ) -> &mut Self {
        self.metadata
            .services
            .entry(contract.into())
            .or_default()
            .push(ServiceProviderFile {
                location: location.into(),
                content: content.into(),
            });
        self
    }

    /// 完成构建
    pub fn build(self) -> ModuleMetadata {
        self.metadata
    }
}

/// 模块定义
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDefinition {
    name: String,
    version: String,
    dependencies: Vec<ModuleDependency>,
    public_interfaces: Vec<String>,
    locations: Vec<String>,
    metadata: Arc<ModuleMetadata>,
    #[serde(skip)]
    manifest: Manifest,
}

impl ModuleDefinition {
    /// 由清单与元数据创建；清单必须带有模块身份属性
    pub fn from_manifest(
        location: impl Into<String>,
        manifest: Manifest,
        metadata: ModuleMetadata,
    ) -> Option<Self> {
        let name = manifest.bundle_name()?;
        let dependencies = manifest
            .required_bundles()
            .into_iter()
            .map(|required| ModuleDependency {
                name: required.name,
                version_range: required.version_range,
                optional: required.optional,
            })
            .collect();

        Some(Self {
            name,
            version: manifest.bundle_version().to_string(),
            dependencies,
            public_interfaces: manifest.exported_packages(),
            locations: vec![location.into()],
            metadata: Arc::new(metadata),
            manifest,
        })
    }

    /// 直接构建（不经过清单）
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            public_interfaces: Vec::new(),
            locations: Vec::new(),
            metadata: Arc::new(ModuleMetadata::default()),
            manifest: Manifest::default(),
        }
    }

    /// 追加依赖
    pub fn with_dependency(mut self, dependency: ModuleDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 追加位置
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.locations.push(location.into());
        self
    }

    /// 替换元数据
    pub fn with_metadata(mut self, metadata: ModuleMetadata) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// 模块标识
    pub fn id(&self) -> ModuleId {
        ModuleId::new(&self.name, &self.version)
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 版本原文
    pub fn version(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        }
    }

    /// 依赖声明
    pub fn dependencies(&self) -> &[ModuleDependency] {
        &self.dependencies
    }

    /// 导出的接口名
    pub fn public_interfaces(&self) -> &[String] {
        &self.public_interfaces
    }

    /// 组成类路径的位置 URI
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// 元数据
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// 原始清单
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_manifest() {
        let manifest = Manifest::parse(
            "test",
            "Bundle-Name: Core\n\
Bundle-SymbolicName: com.example.core\n\
Bundle-Version: 2.1\n\
Require-Bundle: com.example.api;bundle-version=\"[1.0,2.0)\"\n\
Export-Package: com.example.core\n",
        )
        .unwrap();

        let definition =
            ModuleDefinition::from_manifest("archive:file:/x.zip!/m/core.jar", manifest, ModuleMetadata::default())
                .unwrap();

        assert_eq!(definition.id(), ModuleId::new("com.example.core", "2.1"));
        assert_eq!(definition.id().to_string(), "com.example.core:2.1");
        assert_eq!(definition.dependencies().len(), 1);
        assert!(definition.dependencies()[0]
            .range()
            .unwrap()
            .includes_str("1.5"));
        assert_eq!(definition.public_interfaces(), ["com.example.core"]);
        assert_eq!(definition.locations(), ["archive:file:/x.zip!/m/core.jar"]);
    }

    #[test]
    fn test_manifest_without_identity_is_not_a_module() {
        let manifest = Manifest::parse("test", "Manifest-Version: 1.0\n").unwrap();
        assert!(ModuleDefinition::from_manifest("x", manifest, ModuleMetadata::default()).is_none());
    }

    #[test]
    fn test_metadata_builder() {
        let mut builder = ModuleMetadata::builder();
        builder
            .add_service("com.example.Api", "archive:x!/META-INF/services/com.example.Api", "# c\ncom.example.Impl\n\n")
            .add_descriptors("default", vec![ComponentDescriptor::new("a.A")])
            .add_descriptors("default", vec![ComponentDescriptor::new("b.B")]);
        let metadata = builder.build();

        assert_eq!(metadata.descriptors("default").len(), 2);
        assert!(metadata.descriptors("missing").is_empty());
        let providers: Vec<&str> = metadata.services("com.example.Api")[0]
            .provider_names()
            .collect();
        assert_eq!(providers, vec!["com.example.Impl"]);
        assert_eq!(metadata.service_contracts().collect::<Vec<_>>(), vec!["com.example.Api"]);
    }
}

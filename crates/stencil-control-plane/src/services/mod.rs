// Services layer
// Services own orchestration across the relational and cluster stores

pub mod template;

pub use template::TemplateService;

use std::time::Duration;

use cas_client::validation::codec::{Cas20Codec, Cas30Codec, ProtocolCodec, RequestOptions, Saml11Codec};
use cas_client::validation::RandomIdGenerator;
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const CAS2_RESPONSE: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationSuccess>
        <cas:user>alice</cas:user>
        <cas:attributes>
            <cas:mail>alice@example.com</cas:mail>
            <cas:memberOf>staff</cas:memberOf>
            <cas:memberOf>faculty</cas:memberOf>
        </cas:attributes>
        <cas:proxyGrantingTicket>PGTIOU-84678-8a9d</cas:proxyGrantingTicket>
        <cas:proxies><cas:proxy>https://proxy.example.com/</cas:proxy></cas:proxies>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#;

const CAS3_RESPONSE: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationSuccess>
        <cas:user>alice</cas:user>
        <cas:attribute name="mail" value="alice@example.com"/>
        <cas:attribute name="memberOf" value="staff"/>
        <cas:attribute name="memberOf" value="faculty"/>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#;

const SAML_RESPONSE: &str = r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body>
    <Response xmlns="urn:oasis:names:tc:SAML:1.0:protocol" MajorVersion="1" MinorVersion="1">
        <Status><StatusCode Value="samlp:Success"/></Status>
        <Assertion xmlns="urn:oasis:names:tc:SAML:1.0:assertion">
            <Conditions NotBefore="2024-05-01T11:59:30.000Z" NotOnOrAfter="2024-05-01T12:00:30.000Z"/>
            <AttributeStatement>
                <Subject><NameIdentifier>alice</NameIdentifier></Subject>
                <Attribute AttributeName="memberOf"><AttributeValue>staff</AttributeValue><AttributeValue>faculty</AttributeValue></Attribute>
            </AttributeStatement>
            <AuthenticationStatement AuthenticationInstant="2024-05-01T11:59:30.000Z" AuthenticationMethod="urn:oasis:names:tc:SAML:1.0:am:password">
                <Subject><NameIdentifier>alice</NameIdentifier></Subject>
            </AuthenticationStatement>
        </Assertion>
    </Response>
</SOAP-ENV:Body></SOAP-ENV:Envelope>"#;

fn bench_parse_responses(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let options = RequestOptions::new("https://cas.example.com/cas");

    let cas2 = Cas20Codec::new(options.clone(), false);
    let cas3 = Cas30Codec::new(options.clone(), false);
    let saml = Saml11Codec::new(options, Duration::from_millis(1000), Box::new(RandomIdGenerator));

    // Parse each response once before benchmarking
    for (name, result) in [
        ("cas2", cas2.parse_response(CAS2_RESPONSE, now)),
        ("cas3", cas3.parse_response(CAS3_RESPONSE, now)),
        ("saml11", saml.parse_response(SAML_RESPONSE, now)),
    ] {
        if let Err(e) = result {
            panic!("Failed to parse {} response: {:?}", name, e);
        }
    }

    c.bench_function("parse_cas2_response", |b| {
        b.iter(|| cas2.parse_response(black_box(CAS2_RESPONSE), now).unwrap())
    });
    c.bench_function("parse_cas3_response", |b| {
        b.iter(|| cas3.parse_response(black_box(CAS3_RESPONSE), now).unwrap())
    });
    c.bench_function("parse_saml11_response", |b| {
        b.iter(|| saml.parse_response(black_box(SAML_RESPONSE), now).unwrap())
    });
}

fn bench_build_saml_request(c: &mut Criterion) {
    let now = Utc::now();
    let saml = Saml11Codec::new(
        RequestOptions::new("https://cas.example.com/cas"),
        Duration::from_millis(1000),
        Box::new(RandomIdGenerator),
    );
    c.bench_function("build_saml11_request", |b| {
        b.iter(|| saml.build_request(black_box("ST-1856339-aA5Yuvrxzpv8Tau1cYQ7"), "https://app.example.com/", now))
    });
}

criterion_group!(benches, bench_parse_responses, bench_build_saml_request);
criterion_main!(benches);
